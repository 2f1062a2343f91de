//! IAM roles and policy statements.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::template::{self, Resource, Stack};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const ECS_TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
pub const EC2_PRINCIPAL: &str = "ec2.amazonaws.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: Effect,

    pub action: Vec<String>,

    pub resource: Vec<Value>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: BTreeMap<String, BTreeMap<String, Value>>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str]) -> Self {
        Self {
            effect: Effect::Allow,
            action: actions.iter().map(|action| action.to_string()).collect(),
            resource: vec![],
            condition: BTreeMap::new(),
        }
    }

    pub fn on(mut self, resource: Value) -> Self {
        self.resource.push(resource);
        self
    }

    pub fn on_any(self) -> Self {
        self.on(json!("*"))
    }

    pub fn when(mut self, operator: &str, key: &str, value: Value) -> Self {
        self.condition
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self
    }

    pub fn grants(&self, action: &str) -> bool {
        self.action.iter().any(|granted| granted == action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<PolicyStatement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }
}

/// `arn:<partition>:iam::aws:policy/<name>` for an AWS managed policy.
pub fn managed_policy_arn(name: &str) -> Value {
    template::join(
        "",
        vec![
            json!("arn:"),
            template::reference("AWS::Partition"),
            json!(format!(":iam::aws:policy/{}", name)),
        ],
    )
}

/// An IAM role trusted by one service principal.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    assumed_by: String,
    managed_policies: Vec<String>,
    statements: Vec<PolicyStatement>,
}

impl Role {
    pub fn new(assumed_by: &str) -> Self {
        Self {
            assumed_by: assumed_by.to_string(),
            managed_policies: vec![],
            statements: vec![],
        }
    }

    pub fn with_managed_policy(mut self, name: &str) -> Self {
        self.managed_policies.push(name.to_string());
        self
    }

    pub fn add_to_policy(&mut self, statement: PolicyStatement) {
        self.statements.push(statement);
    }

    pub fn assumed_by(&self) -> &str {
        &self.assumed_by
    }

    pub fn managed_policies(&self) -> &[String] {
        &self.managed_policies
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    pub fn has_permissions(&self) -> bool {
        !self.managed_policies.is_empty() || !self.statements.is_empty()
    }

    fn trust_policy(&self) -> Value {
        json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": self.assumed_by },
                "Action": "sts:AssumeRole",
            }],
        })
    }

    /// Emits the role, plus an inline `<id>DefaultPolicy` when it carries statements.
    /// Returns the role's ARN.
    pub fn add_to(&self, stack: &mut Stack, logical_id: &str) -> Result<Value, template::Error> {
        let mut properties = json!({ "AssumeRolePolicyDocument": self.trust_policy() });
        if !self.managed_policies.is_empty() {
            properties["ManagedPolicyArns"] = Value::Array(
                self.managed_policies
                    .iter()
                    .map(|name| managed_policy_arn(name))
                    .collect(),
            );
        }
        let role = stack.add(logical_id, Resource::new("AWS::IAM::Role", properties))?;

        if !self.statements.is_empty() {
            let policy_id = format!("{}DefaultPolicy", logical_id);
            stack.add(
                &policy_id,
                Resource::new(
                    "AWS::IAM::Policy",
                    json!({
                        "PolicyName": policy_id,
                        "PolicyDocument": PolicyDocument::new(self.statements.clone()),
                        "Roles": [role],
                    }),
                ),
            )?;
        }

        Ok(template::get_att(logical_id, "Arn"))
    }
}
