use aws_config::meta::region::RegionProviderChain;
use aws_types::region::Region;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::template;

pub const ACCOUNT_VAR: &str = "CDK_DEFAULT_ACCOUNT";
pub const REGION_VAR: &str = "CDK_DEFAULT_REGION";

/// Account and region the stacks are synthesized for. A missing value renders
/// as the matching CloudFormation pseudo parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEnvironment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl DeployEnvironment {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Self {
            account: account.filter(|value| !value.is_empty()),
            region: region.filter(|value| !value.is_empty()),
        }
    }

    /// Field-wise fallback: values already set win over `other`.
    pub fn or(self, other: DeployEnvironment) -> Self {
        Self::new(
            self.account.or(other.account),
            self.region.or(other.region),
        )
    }

    /// Fills a missing region from the AWS SDK default provider chain.
    pub async fn with_default_region(self) -> Self {
        if self.region.is_some() {
            return self;
        }

        let region = RegionProviderChain::default_provider()
            .region()
            .await
            .map(|region: Region| region.as_ref().to_string());
        if let Some(region) = &region {
            tracing::debug!(%region, "resolved region from the default provider chain");
        }

        Self::new(self.account, region)
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = vec![];
        if self.account.is_none() {
            missing.push("account");
        }
        if self.region.is_none() {
            missing.push("region");
        }
        missing
    }

    pub fn region_value(&self) -> Value {
        match &self.region {
            Some(region) => json!(region),
            None => template::reference("AWS::Region"),
        }
    }

    pub fn account_value(&self) -> Value {
        match &self.account {
            Some(account) => json!(account),
            None => template::reference("AWS::AccountId"),
        }
    }

    /// `arn:aws:<service>:<region>:<account>:<resource>`, substituted at deploy
    /// time for whichever half of the environment is unknown.
    pub fn arn(&self, service: &str, resource: &str) -> Value {
        match (&self.region, &self.account) {
            (Some(region), Some(account)) => {
                json!(format!("arn:aws:{}:{}:{}:{}", service, region, account, resource))
            }
            (region, account) => {
                let region = region.as_deref().unwrap_or("${AWS::Region}");
                let account = account.as_deref().unwrap_or("${AWS::AccountId}");
                template::sub(&format!(
                    "arn:aws:{}:{}:{}:{}",
                    service, region, account, resource
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_count_as_missing() {
        let environment =
            DeployEnvironment::new(Some(String::new()), Some(String::from("eu-west-1")));
        assert_eq!(vec!["account"], environment.missing());
    }

    #[test]
    fn empty_fallback_values_count_as_missing() {
        let configured = DeployEnvironment {
            account: Some(String::new()),
            region: Some(String::new()),
        };
        let environment = DeployEnvironment::new(None, None).or(configured);

        assert_eq!(None, environment.region);
        assert_eq!(vec!["account", "region"], environment.missing());
    }

    #[test]
    fn explicit_values_win_over_fallback() {
        let environment = DeployEnvironment::new(None, Some(String::from("us-east-1"))).or(
            DeployEnvironment::new(
                Some(String::from("123456789012")),
                Some(String::from("eu-west-1")),
            ),
        );

        assert_eq!(Some(String::from("123456789012")), environment.account);
        assert_eq!(Some(String::from("us-east-1")), environment.region);
    }

    #[test]
    fn arn_is_literal_when_environment_is_known() {
        let environment = DeployEnvironment::new(
            Some(String::from("123456789012")),
            Some(String::from("us-east-1")),
        );

        assert_eq!(
            json!("arn:aws:ecs:us-east-1:123456789012:task/*"),
            environment.arn("ecs", "task/*")
        );
    }

    #[test]
    fn arn_falls_back_to_pseudo_parameters() {
        let environment = DeployEnvironment::new(None, Some(String::from("us-east-1")));

        assert_eq!(
            json!({ "Fn::Sub": "arn:aws:ecs:us-east-1:${AWS::AccountId}:task/*" }),
            environment.arn("ecs", "task/*")
        );
        assert_eq!(json!({ "Ref": "AWS::AccountId" }), environment.account_value());
    }
}
