use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::asset::DockerImageAsset;
use crate::config::{LoadBalancerMode, MasterSettings, WorkerSettings};
use crate::ecs::{Ecs, EFS_MOUNT_PATH};
use crate::environment::DeployEnvironment;
use crate::iam::{self, PolicyStatement, Role};
use crate::network::Network;
use crate::template::{self, Resource, Stack};
use crate::worker::{JenkinsWorker, EXECUTION_POLICY};

pub const WEB_PORT: u16 = 8080;
pub const AGENT_PORT: u16 = 50000;
pub const LISTENER_PORT: u16 = 80;
pub const JENKINS_HOME: &str = "/var/jenkins_home";

const CONTAINER_NAME: &str = "master";
const HOME_VOLUME: &str = "jenkins-home";
const LOG_STREAM_PREFIX: &str = "jenkinsLog";

/// How the master's tasks are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compute {
    Fargate,
    /// Cluster instances with `JENKINS_HOME` on the host's EFS mount.
    Ec2,
}

impl Compute {
    fn launch_type(self) -> &'static str {
        match self {
            Compute::Fargate => "FARGATE",
            Compute::Ec2 => "EC2",
        }
    }
}

/// Variables handed to the master container, the channel through which
/// Jenkins learns where to launch workers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerEnvironment(BTreeMap<String, Value>);

impl ContainerEnvironment {
    pub fn insert(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the `Environment` list of a container definition.
    pub fn to_cfn(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|(name, value)| json!({ "Name": name, "Value": value }))
                .collect(),
        )
    }
}

/// Master service behind a public load balancer, allowed to orchestrate worker tasks.
pub struct JenkinsMaster {
    stack: Stack,
    image: DockerImageAsset,
    compute: Compute,
    environment: ContainerEnvironment,
    task_role: Role,
}

impl JenkinsMaster {
    pub fn new(
        stack_name: &str,
        settings: &MasterSettings,
        worker_settings: &WorkerSettings,
        env: &DeployEnvironment,
        network: &Network,
        ecs: &Ecs,
        worker: &JenkinsWorker,
    ) -> Result<Self, template::Error> {
        let mut stack = Stack::new(stack_name, "Jenkins on ECS: master service");
        let compute = match ecs.capacity() {
            Some(_) => Compute::Ec2,
            None => Compute::Fargate,
        };

        let vpc = stack.import(network.vpc_id());
        let public_subnets: Vec<Value> = network
            .public_subnets()
            .iter()
            .map(|subnet| stack.import(subnet))
            .collect();
        let private_subnets: Vec<Value> = network
            .private_subnets()
            .iter()
            .map(|subnet| stack.import(subnet))
            .collect();
        let cluster_name = stack.import(ecs.cluster_name_export());
        let cluster_arn = stack.import(ecs.cluster_arn());
        let namespace_id = stack.import(ecs.namespace_id());
        let worker_group = stack.import(worker.security_group());
        let worker_execution_role = stack.import(worker.execution_role_arn());
        let worker_task_role = stack.import(worker.task_role_arn());
        let worker_log_group = stack.import(worker.log_group());
        let worker_log_stream = stack.import(worker.log_stream());

        let image = DockerImageAsset::new("JenkinsMasterDockerImage", &settings.image);

        let mut environment = ContainerEnvironment::default();
        environment.insert("JAVA_OPTS", json!("-Djenkins.install.runSetupWizard=false"));
        environment.insert("CASC_JENKINS_CONFIG", json!("/config-as-code.yaml"));
        environment.insert("network_stack", json!(network.stack_name()));
        environment.insert("cluster_stack", json!(ecs.stack_name()));
        environment.insert("worker_stack", json!(worker.stack_name()));
        environment.insert("cluster_arn", cluster_arn.clone());
        environment.insert("aws_region", env.region_value());
        environment.insert(
            "jenkins_url",
            json!(format!(
                "http://{}.{}:{}",
                settings.discovery_name,
                ecs.namespace(),
                WEB_PORT
            )),
        );
        environment.insert("subnet_ids", template::join(",", private_subnets.clone()));
        environment.insert("security_group_ids", worker_group.clone());
        environment.insert("execution_role_arn", worker_execution_role.clone());
        environment.insert("task_role_arn", worker_task_role.clone());
        environment.insert("worker_log_group", worker_log_group);
        environment.insert("worker_log_stream_prefix", worker_log_stream);

        let task_role = task_role(
            env,
            &worker_settings.task_definition_prefix,
            &cluster_arn,
            &worker_task_role,
            &worker_execution_role,
        );
        let task_role_arn = task_role.add_to(&mut stack, "JenkinsTaskDefinitionTaskRole")?;
        let execution_role_arn = Role::new(iam::ECS_TASKS_PRINCIPAL)
            .with_managed_policy(EXECUTION_POLICY)
            .add_to(&mut stack, "JenkinsTaskDefinitionExecutionRole")?;

        let log_group = stack.add(
            "JenkinsMasterLogGroup",
            Resource::new("AWS::Logs::LogGroup", json!({})),
        )?;

        let mut container = json!({
            "Name": CONTAINER_NAME,
            "Image": image.image_uri(),
            "Essential": true,
            "Environment": environment.to_cfn(),
            "LogConfiguration": {
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": log_group,
                    "awslogs-stream-prefix": LOG_STREAM_PREFIX,
                    "awslogs-region": env.region_value(),
                },
            },
            "PortMappings": [
                { "ContainerPort": WEB_PORT, "Protocol": "tcp" },
                { "ContainerPort": AGENT_PORT, "HostPort": AGENT_PORT, "Protocol": "tcp" },
            ],
        });
        let mut task_definition = json!({
            "Family": settings.family,
            "Cpu": settings.cpu.to_string(),
            "Memory": settings.memory_mib.to_string(),
            "NetworkMode": "awsvpc",
            "RequiresCompatibilities": [compute.launch_type()],
            "ExecutionRoleArn": execution_role_arn,
            "TaskRoleArn": task_role_arn,
        });
        if compute == Compute::Ec2 {
            container["MountPoints"] = json!([{
                "SourceVolume": HOME_VOLUME,
                "ContainerPath": JENKINS_HOME,
                "ReadOnly": false,
            }]);
            task_definition["Volumes"] = json!([{
                "Name": HOME_VOLUME,
                "Host": { "SourcePath": EFS_MOUNT_PATH },
            }]);
        }
        task_definition["ContainerDefinitions"] = json!([container]);
        let task_definition = stack.add(
            "JenkinsTaskDefinition",
            Resource::new("AWS::ECS::TaskDefinition", task_definition),
        )?;

        // security groups
        stack.add(
            "JenkinsMasterServiceSecurityGroup",
            Resource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": "Jenkins master service",
                    "VpcId": vpc,
                    "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
                }),
            ),
        )?;
        let service_group = template::get_att("JenkinsMasterServiceSecurityGroup", "GroupId");
        stack.add(
            "JenkinsMasterLBSecurityGroup",
            Resource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": "Jenkins master load balancer",
                    "VpcId": vpc,
                    "SecurityGroupIngress": [{
                        "CidrIp": "0.0.0.0/0",
                        "IpProtocol": "tcp",
                        "FromPort": LISTENER_PORT,
                        "ToPort": LISTENER_PORT,
                        "Description": "Allow from anyone on port 80",
                    }],
                    "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
                }),
            ),
        )?;
        let lb_group = template::get_att("JenkinsMasterLBSecurityGroup", "GroupId");
        add_ingress(
            &mut stack,
            "ServiceIngressFromLoadBalancer",
            &service_group,
            &lb_group,
            WEB_PORT,
            "Load balancer to target",
        )?;
        add_ingress(
            &mut stack,
            "ServiceIngressFromWorkerAgentPort",
            &service_group,
            &worker_group,
            AGENT_PORT,
            "Master to Worker 50000",
        )?;
        add_ingress(
            &mut stack,
            "ServiceIngressFromWorkerWebPort",
            &service_group,
            &worker_group,
            WEB_PORT,
            "Master to Worker 8080",
        )?;

        // load balancer
        let load_balancer = stack.add(
            "JenkinsMasterLB",
            Resource::new(
                "AWS::ElasticLoadBalancingV2::LoadBalancer",
                json!({
                    "Type": "application",
                    "Scheme": "internet-facing",
                    "Subnets": public_subnets,
                    "SecurityGroups": [lb_group],
                }),
            ),
        )?;
        let target_group = stack.add(
            "JenkinsMasterTargetGroup",
            Resource::new(
                "AWS::ElasticLoadBalancingV2::TargetGroup",
                target_group_properties(settings, &vpc),
            ),
        )?;
        let wiring = add_listener(
            &mut stack,
            settings.load_balancer,
            &load_balancer,
            &target_group,
        )?;

        // service discovery
        stack.add(
            "JenkinsMasterCloudMapService",
            Resource::new(
                "AWS::ServiceDiscovery::Service",
                json!({
                    "Name": settings.discovery_name,
                    "NamespaceId": namespace_id,
                    "DnsConfig": {
                        "DnsRecords": [{ "Type": "A", "TTL": 60 }],
                        "RoutingPolicy": "MULTIVALUE",
                    },
                    "HealthCheckCustomConfig": { "FailureThreshold": 1 },
                }),
            ),
        )?;

        let (assign_public_ip, subnets) = match compute {
            Compute::Fargate => ("ENABLED", public_subnets),
            Compute::Ec2 => ("DISABLED", private_subnets),
        };
        stack.add(
            "JenkinsMasterService",
            Resource::new(
                "AWS::ECS::Service",
                json!({
                    "ServiceName": settings.service_name,
                    "Cluster": cluster_name,
                    "TaskDefinition": task_definition,
                    "DesiredCount": settings.desired_count,
                    "LaunchType": compute.launch_type(),
                    "EnableECSManagedTags": true,
                    "HealthCheckGracePeriodSeconds": 60,
                    "DeploymentConfiguration": {
                        "MinimumHealthyPercent": 0,
                        "MaximumPercent": 100,
                    },
                    "NetworkConfiguration": {
                        "AwsvpcConfiguration": {
                            "AssignPublicIp": assign_public_ip,
                            "Subnets": subnets,
                            "SecurityGroups": [service_group],
                        },
                    },
                    "LoadBalancers": [{
                        "ContainerName": CONTAINER_NAME,
                        "ContainerPort": WEB_PORT,
                        "TargetGroupArn": target_group,
                    }],
                    "ServiceRegistries": [{
                        "RegistryArn": template::get_att("JenkinsMasterCloudMapService", "Arn"),
                    }],
                }),
            )
            .depends_on(&wiring),
        )?;

        stack.add_output(
            "LoadBalancerDNS",
            template::get_att("JenkinsMasterLB", "DNSName"),
            "Jenkins master load balancer",
        )?;
        stack.add_output(
            "ServiceURL",
            template::join(
                "",
                vec![json!("http://"), template::get_att("JenkinsMasterLB", "DNSName")],
            ),
            "Jenkins web UI",
        )?;
        if let Some(capacity) = ecs.capacity() {
            let file_system = stack.import(&capacity.file_system_id);
            stack.add_output(
                "JenkinsHomeFileSystemId",
                file_system,
                "Filesystem holding JENKINS_HOME",
            )?;
        }
        tracing::debug!(
            stack = stack_name,
            compute = ?compute,
            load_balancer = ?settings.load_balancer,
            "master synthesized"
        );

        Ok(Self {
            stack,
            image,
            compute,
            environment,
            task_role,
        })
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn into_stack(self) -> Stack {
        self.stack
    }

    pub fn image(&self) -> &DockerImageAsset {
        &self.image
    }

    pub fn compute(&self) -> Compute {
        self.compute
    }

    pub fn environment(&self) -> &ContainerEnvironment {
        &self.environment
    }

    pub fn task_role(&self) -> &Role {
        &self.task_role
    }
}

/// Rights to manage worker task definitions and to run and stop workers on
/// this cluster only.
fn task_role(
    env: &DeployEnvironment,
    worker_prefix: &str,
    cluster_arn: &Value,
    worker_task_role: &Value,
    worker_execution_role: &Value,
) -> Role {
    let mut role = Role::new(iam::ECS_TASKS_PRINCIPAL);
    role.add_to_policy(
        PolicyStatement::allow(&[
            "ecs:RegisterTaskDefinition",
            "ecs:DeregisterTaskDefinition",
            "ecs:ListClusters",
            "ecs:DescribeContainerInstances",
            "ecs:ListTaskDefinitions",
            "ecs:DescribeTaskDefinition",
            "ecs:DescribeTasks",
        ])
        .on_any(),
    );
    role.add_to_policy(
        PolicyStatement::allow(&["ecs:ListContainerInstances"]).on(cluster_arn.clone()),
    );
    role.add_to_policy(
        PolicyStatement::allow(&["ecs:RunTask"])
            .on(env.arn("ecs", &format!("task-definition/{}*", worker_prefix))),
    );
    role.add_to_policy(
        PolicyStatement::allow(&["ecs:StopTask"])
            .on(env.arn("ecs", "task/*"))
            .when("ForAnyValue:ArnEquals", "ecs:cluster", cluster_arn.clone()),
    );
    role.add_to_policy(
        PolicyStatement::allow(&["iam:PassRole"])
            .on(worker_task_role.clone())
            .on(worker_execution_role.clone()),
    );
    role
}

fn add_ingress(
    stack: &mut Stack,
    logical_id: &str,
    group: &Value,
    source: &Value,
    port: u16,
    description: &str,
) -> Result<(), template::Error> {
    stack.add(
        logical_id,
        Resource::new(
            "AWS::EC2::SecurityGroupIngress",
            json!({
                "GroupId": group,
                "SourceSecurityGroupId": source,
                "IpProtocol": "tcp",
                "FromPort": port,
                "ToPort": port,
                "Description": description,
            }),
        ),
    )?;

    Ok(())
}

fn target_group_properties(settings: &MasterSettings, vpc: &Value) -> Value {
    let mut properties = json!({
        "Port": WEB_PORT,
        "Protocol": "HTTP",
        "TargetType": "ip",
        "VpcId": vpc,
        "HealthCheckPath": settings.health_check_path,
    });
    if settings.load_balancer == LoadBalancerMode::Manual {
        properties["HealthCheckIntervalSeconds"] = json!(30);
        properties["HealthCheckTimeoutSeconds"] = json!(10);
        properties["HealthyThresholdCount"] = json!(2);
        properties["UnhealthyThresholdCount"] = json!(5);
        properties["Matcher"] = json!({ "HttpCode": "200" });
        properties["TargetGroupAttributes"] = json!([{
            "Key": "deregistration_delay.timeout_seconds",
            "Value": "30",
        }]);
    }
    properties
}

/// Returns the logical id the service has to wait for before registering targets.
fn add_listener(
    stack: &mut Stack,
    mode: LoadBalancerMode,
    load_balancer: &Value,
    target_group: &Value,
) -> Result<String, template::Error> {
    let forward = json!([{ "Type": "forward", "TargetGroupArn": target_group }]);
    match mode {
        LoadBalancerMode::Managed => {
            stack.add(
                "JenkinsMasterLBPublicListener",
                Resource::new(
                    "AWS::ElasticLoadBalancingV2::Listener",
                    json!({
                        "LoadBalancerArn": load_balancer,
                        "Port": LISTENER_PORT,
                        "Protocol": "HTTP",
                        "DefaultActions": forward,
                    }),
                ),
            )?;
            Ok(String::from("JenkinsMasterLBPublicListener"))
        }
        LoadBalancerMode::Manual => {
            let listener = stack.add(
                "JenkinsMasterLBListener",
                Resource::new(
                    "AWS::ElasticLoadBalancingV2::Listener",
                    json!({
                        "LoadBalancerArn": load_balancer,
                        "Port": LISTENER_PORT,
                        "Protocol": "HTTP",
                        "DefaultActions": [{
                            "Type": "fixed-response",
                            "FixedResponseConfig": {
                                "StatusCode": "404",
                                "ContentType": "text/plain",
                            },
                        }],
                    }),
                ),
            )?;
            stack.add(
                "JenkinsMasterLBListenerRule",
                Resource::new(
                    "AWS::ElasticLoadBalancingV2::ListenerRule",
                    json!({
                        "ListenerArn": listener,
                        "Priority": 1,
                        "Conditions": [{ "Field": "path-pattern", "Values": ["/*"] }],
                        "Actions": forward,
                    }),
                ),
            )?;
            Ok(String::from("JenkinsMasterLBListenerRule"))
        }
    }
}
