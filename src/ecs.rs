use serde_json::{json, Value};

use crate::config::{CapacitySettings, ClusterSettings};
use crate::iam::{self, Role};
use crate::network::Network;
use crate::template::{self, Export, Parameter, Resource, Stack};

pub const EFS_PORT: u16 = 2049;
pub const EFS_MOUNT_PATH: &str = "/mnt/efs";

const ECS_OPTIMIZED_AMI: &str =
    "/aws/service/ecs/optimized-ami/amazon-linux-2/recommended/image_id";

/// EC2 instances registered with the cluster and the EFS filesystem they share.
#[derive(Debug, Clone, PartialEq)]
pub struct Ec2Capacity {
    pub file_system_id: Export,
}

/// ECS cluster and its Cloud Map namespace.
pub struct Ecs {
    stack: Stack,
    cluster_name: String,
    namespace: String,
    cluster_name_export: Export,
    cluster_arn: Export,
    namespace_id: Export,
    capacity: Option<Ec2Capacity>,
}

impl Ecs {
    pub fn new(
        stack_name: &str,
        settings: &ClusterSettings,
        namespace: &str,
        network: &Network,
    ) -> Result<Self, template::Error> {
        let mut stack = Stack::new(stack_name, "Jenkins on ECS: cluster");
        let vpc = stack.import(network.vpc_id());

        let cluster = stack.add(
            "EcsCluster",
            Resource::new(
                "AWS::ECS::Cluster",
                json!({ "ClusterName": settings.name }),
            ),
        )?;
        stack.add(
            "EcsClusterDefaultServiceDiscoveryNamespace",
            Resource::new(
                "AWS::ServiceDiscovery::PrivateDnsNamespace",
                json!({ "Name": namespace, "Vpc": vpc }),
            ),
        )?;

        let capacity = match &settings.capacity {
            Some(capacity) => Some(add_capacity(&mut stack, capacity, network, &vpc)?),
            None => None,
        };

        let cluster_name_export = stack.export("ClusterName", cluster, "ECS cluster name")?;
        let cluster_arn = stack.export(
            "ClusterArn",
            template::get_att("EcsCluster", "Arn"),
            "ECS cluster ARN",
        )?;
        let namespace_id = stack.export(
            "NamespaceId",
            template::get_att("EcsClusterDefaultServiceDiscoveryNamespace", "Id"),
            "Cloud Map namespace id",
        )?;
        tracing::debug!(
            stack = stack_name,
            cluster = %settings.name,
            ec2 = capacity.is_some(),
            "cluster synthesized"
        );

        Ok(Self {
            stack,
            cluster_name: settings.name.clone(),
            namespace: namespace.to_string(),
            cluster_name_export,
            cluster_arn,
            namespace_id,
            capacity,
        })
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn into_stack(self) -> Stack {
        self.stack
    }

    pub fn stack_name(&self) -> &str {
        self.stack.name()
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cluster_name_export(&self) -> &Export {
        &self.cluster_name_export
    }

    pub fn cluster_arn(&self) -> &Export {
        &self.cluster_arn
    }

    pub fn namespace_id(&self) -> &Export {
        &self.namespace_id
    }

    pub fn capacity(&self) -> Option<&Ec2Capacity> {
        self.capacity.as_ref()
    }
}

fn add_capacity(
    stack: &mut Stack,
    settings: &CapacitySettings,
    network: &Network,
    vpc: &Value,
) -> Result<Ec2Capacity, template::Error> {
    let private_subnets: Vec<Value> = network
        .private_subnets()
        .iter()
        .map(|subnet| stack.import(subnet))
        .collect();

    stack.add(
        "Ec2InstanceSecurityGroup",
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Jenkins ECS container instances",
                "VpcId": vpc,
                "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
            }),
        ),
    )?;
    let instance_group = template::get_att("Ec2InstanceSecurityGroup", "GroupId");

    let instance_role = Role::new(iam::EC2_PRINCIPAL)
        .with_managed_policy("service-role/AmazonEC2ContainerServiceforEC2Role");
    instance_role.add_to(stack, "Ec2InstanceRole")?;
    stack.add(
        "Ec2InstanceProfile",
        Resource::new(
            "AWS::IAM::InstanceProfile",
            json!({ "Roles": [template::reference("Ec2InstanceRole")] }),
        ),
    )?;

    stack.add(
        "EfsSecurityGroup",
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Jenkins home on EFS",
                "VpcId": vpc,
                "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
            }),
        ),
    )?;
    let efs_group = template::get_att("EfsSecurityGroup", "GroupId");
    stack.add(
        "EfsSecurityGroupIngressFromInstances",
        Resource::new(
            "AWS::EC2::SecurityGroupIngress",
            json!({
                "GroupId": efs_group,
                "SourceSecurityGroupId": instance_group,
                "IpProtocol": "tcp",
                "FromPort": EFS_PORT,
                "ToPort": EFS_PORT,
                "Description": "EFS",
            }),
        ),
    )?;

    let file_system = stack.add(
        "EfsFileSystem",
        Resource::new("AWS::EFS::FileSystem", json!({ "Encrypted": true })),
    )?;
    let mut mount_targets = vec![];
    for (index, subnet) in private_subnets.iter().enumerate() {
        let id = format!("EfsMountTarget{}", index + 1);
        stack.add(
            &id,
            Resource::new(
                "AWS::EFS::MountTarget",
                json!({
                    "FileSystemId": file_system,
                    "SubnetId": subnet,
                    "SecurityGroups": [efs_group],
                }),
            ),
        )?;
        mount_targets.push(id);
    }

    let ami = stack.add_parameter(
        "EcsOptimizedAmi",
        Parameter {
            parameter_type: String::from("AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>"),
            default: Some(ECS_OPTIMIZED_AMI.to_string()),
            description: Some(String::from("ECS-optimized Amazon Linux 2 image")),
        },
    )?;
    let mut launch_data = json!({
        "ImageId": ami,
        "InstanceType": settings.instance_type,
        "IamInstanceProfile": { "Arn": template::get_att("Ec2InstanceProfile", "Arn") },
        "SecurityGroupIds": [instance_group],
        "UserData": template::base64(template::sub(&user_data())),
    });
    if let Some(key_name) = &settings.key_name {
        launch_data["KeyName"] = json!(key_name);
    }
    let launch_template = stack.add(
        "Ec2LaunchTemplate",
        Resource::new(
            "AWS::EC2::LaunchTemplate",
            json!({ "LaunchTemplateData": launch_data }),
        )
        .depends_on("Ec2InstanceRole"),
    )?;

    let desired = settings.desired_capacity.to_string();
    let mut asg = Resource::new(
        "AWS::AutoScaling::AutoScalingGroup",
        json!({
            "MinSize": desired,
            "MaxSize": desired,
            "DesiredCapacity": desired,
            "LaunchTemplate": {
                "LaunchTemplateId": launch_template,
                "Version": template::get_att("Ec2LaunchTemplate", "LatestVersionNumber"),
            },
            "VPCZoneIdentifier": private_subnets,
        }),
    );
    // instances mount the filesystem while booting
    for id in &mount_targets {
        asg = asg.depends_on(id);
    }
    stack.add("Ec2Asg", asg)?;

    stack.add_output(
        "InstanceSecurityGroupId",
        instance_group,
        "Container instance security group",
    )?;
    let file_system_id = stack.export("FileSystemId", file_system, "Jenkins home filesystem")?;

    Ok(Ec2Capacity { file_system_id })
}

/// Registers the instance with the cluster and mounts the shared filesystem.
fn user_data() -> String {
    format!(
        "#!/bin/bash
echo ECS_CLUSTER=${{EcsCluster}} >> /etc/ecs/ecs.config
yum install -y amazon-efs-utils
mkdir -p {path}
mount -t efs -o tls ${{EfsFileSystem}}:/ {path}
chown -R ec2-user: {path}
chmod -R 0777 {path}
",
        path = EFS_MOUNT_PATH
    )
}
