use serde_json::json;

use crate::asset::DockerImageAsset;
use crate::config::WorkerSettings;
use crate::iam::{self, Role};
use crate::network::Network;
use crate::template::{self, Export, Resource, Stack};

pub const EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";

/// Identity the master hands to the worker tasks it launches. Runs nothing itself.
pub struct JenkinsWorker {
    stack: Stack,
    image: DockerImageAsset,
    execution_role: Role,
    task_role: Role,
    security_group: Export,
    execution_role_arn: Export,
    task_role_arn: Export,
    log_group: Export,
    log_stream: Export,
}

impl JenkinsWorker {
    pub fn new(
        stack_name: &str,
        settings: &WorkerSettings,
        network: &Network,
    ) -> Result<Self, template::Error> {
        let mut stack = Stack::new(stack_name, "Jenkins on ECS: worker identity");
        let vpc = stack.import(network.vpc_id());

        let image = DockerImageAsset::new("JenkinsWorkerDockerImage", &settings.image);
        stack.add_output("WorkerImageUri", image.image_uri(), "Worker container image")?;

        stack.add(
            "WorkerSecurityGroup",
            Resource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": "Jenkins Worker access to Jenkins Master",
                    "VpcId": vpc,
                    "SecurityGroupEgress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": "-1" }],
                }),
            ),
        )?;

        let execution_role =
            Role::new(iam::ECS_TASKS_PRINCIPAL).with_managed_policy(EXECUTION_POLICY);
        let execution_arn = execution_role.add_to(&mut stack, "WorkerExecutionRole")?;

        let task_role = Role::new(iam::ECS_TASKS_PRINCIPAL);
        let task_arn = task_role.add_to(&mut stack, "WorkerTaskRole")?;

        let log_group = stack.add(
            "WorkerLogGroup",
            Resource::new(
                "AWS::Logs::LogGroup",
                json!({ "RetentionInDays": settings.log_retention_days }),
            ),
        )?;
        let log_stream = stack.add(
            "WorkerLogStream",
            Resource::new("AWS::Logs::LogStream", json!({ "LogGroupName": log_group })),
        )?;

        let security_group = stack.export(
            "WorkerSecurityGroupId",
            template::get_att("WorkerSecurityGroup", "GroupId"),
            "Worker security group",
        )?;
        let execution_role_arn =
            stack.export("WorkerExecutionRoleArn", execution_arn, "Worker execution role")?;
        let task_role_arn = stack.export("WorkerTaskRoleArn", task_arn, "Worker task role")?;
        let log_group = stack.export("WorkerLogGroupName", log_group, "Worker log group")?;
        let log_stream = stack.export("WorkerLogStreamName", log_stream, "Worker log stream")?;

        Ok(Self {
            stack,
            image,
            execution_role,
            task_role,
            security_group,
            execution_role_arn,
            task_role_arn,
            log_group,
            log_stream,
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

    pub fn image(&self) -> &DockerImageAsset {
        &self.image
    }

    pub fn execution_role(&self) -> &Role {
        &self.execution_role
    }

    pub fn task_role(&self) -> &Role {
        &self.task_role
    }

    pub fn security_group(&self) -> &Export {
        &self.security_group
    }

    pub fn execution_role_arn(&self) -> &Export {
        &self.execution_role_arn
    }

    pub fn task_role_arn(&self) -> &Export {
        &self.task_role_arn
    }

    pub fn log_group(&self) -> &Export {
        &self.log_group
    }

    pub fn log_stream(&self) -> &Export {
        &self.log_stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkSettings;

    fn worker() -> JenkinsWorker {
        let network = Network::new("JenkinsNetwork", &NetworkSettings::default()).unwrap();
        JenkinsWorker::new("JenkinsWorker", &WorkerSettings::default(), &network).unwrap()
    }

    #[test]
    fn execution_role_has_task_execution_policy() {
        let worker = worker();

        assert_eq!(
            vec![String::from(EXECUTION_POLICY)],
            worker.execution_role().managed_policies()
        );
        let role = worker.stack().resource("WorkerExecutionRole").unwrap();
        assert_eq!(
            Some(&json!([{
                "Fn::Join": ["", [
                    "arn:",
                    { "Ref": "AWS::Partition" },
                    ":iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy",
                ]]
            }])),
            role.property("ManagedPolicyArns")
        );
    }

    #[test]
    fn task_role_starts_without_permissions() {
        let worker = worker();

        assert!(!worker.task_role().has_permissions());
        assert!(worker.task_role().statements().is_empty());
        assert!(worker.stack().resource("WorkerTaskRoleDefaultPolicy").is_none());
        assert_eq!(iam::ECS_TASKS_PRINCIPAL, worker.task_role().assumed_by());
    }

    #[test]
    fn security_group_has_no_ingress() {
        let worker = worker();

        let group = worker.stack().resource("WorkerSecurityGroup").unwrap();
        assert!(group.property("SecurityGroupIngress").is_none());
        assert_eq!(
            0,
            worker
                .stack()
                .resources_of_type("AWS::EC2::SecurityGroupIngress")
                .count()
        );
    }

    #[test]
    fn logs_kept_for_one_day() {
        let worker = worker();

        let group = worker.stack().resource("WorkerLogGroup").unwrap();
        assert_eq!(Some(&json!(1)), group.property("RetentionInDays"));
        let stream = worker.stack().resource("WorkerLogStream").unwrap();
        assert_eq!(Some(&json!({ "Ref": "WorkerLogGroup" })), stream.property("LogGroupName"));
        assert_eq!("JenkinsWorker:WorkerLogStreamName", worker.log_stream().name());
    }
}
