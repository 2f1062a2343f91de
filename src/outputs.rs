use aws_config::meta::region::RegionProviderChain;
use aws_sdk_cloudformation::model;
use aws_sdk_cloudformation::types::SdkError;
use aws_types::region::Region;
use std::collections::BTreeMap;
use std::future::Future;

use crate::writer::StackOutputs;

/// Error code CloudFormation answers `DescribeStacks` with for an unknown stack.
const VALIDATION_ERROR_CODE: &str = "ValidationError";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),

    #[error("Stack {0} not found")]
    NotFoundError(String),
}

/// A stack already deployed to CloudFormation.
pub struct DeployedStack {
    pub stack_name: String,

    client: aws_sdk_cloudformation::Client,
}

impl DeployedStack {
    pub fn new(stack_name: &str, client: aws_sdk_cloudformation::Client) -> Self {
        return Self {
            stack_name: stack_name.to_string(),
            client,
        };
    }

    pub async fn get_outputs(&self) -> Result<BTreeMap<String, String>, Error> {
        let result = self
            .client
            .describe_stacks()
            .stack_name(&self.stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(SdkError::ServiceError { err, .. }) => {
                return Err(service_error(&self.stack_name, err.code(), err.to_string()));
            }
            Err(err) => return Err(Error::UnknownError(err.to_string())),
        };

        return outputs_of(&self.stack_name, result.stacks().unwrap_or_default());
    }
}

fn service_error(stack_name: &str, code: Option<&str>, message: String) -> Error {
    return match code {
        Some(VALIDATION_ERROR_CODE) => Error::NotFoundError(stack_name.to_string()),
        _ => Error::ServiceError(message),
    };
}

/// Output key to value of the first described stack. Outputs missing either half are skipped.
fn outputs_of(
    stack_name: &str,
    stacks: &[model::Stack],
) -> Result<BTreeMap<String, String>, Error> {
    let stack = match stacks.first() {
        Some(stack) => stack,
        None => return Err(Error::NotFoundError(stack_name.to_string())),
    };

    let outputs = stack
        .outputs()
        .unwrap_or_default()
        .iter()
        .filter_map(|output| match (output.output_key(), output.output_value()) {
            (Some(key), Some(value)) => Some((key.to_string(), value.to_string())),
            _ => None,
        })
        .collect();

    return Ok(outputs);
}

/// Builds a CloudFormation client, falling back to the default region provider chain.
pub async fn client(region: Option<String>) -> Result<aws_sdk_cloudformation::Client, Error> {
    let region = match region {
        Some(provided_region) => Region::new(provided_region),
        None => match RegionProviderChain::default_provider().region().await {
            Some(region) => region,
            None => {
                return Err(Error::UnknownError(String::from(
                    "no region configured for the CloudFormation client",
                )))
            }
        },
    };

    let sdk_config = aws_config::from_env().region(region).load().await;
    return Ok(aws_sdk_cloudformation::Client::new(&sdk_config));
}

/// Fetches the outputs of every named stack concurrently.
pub async fn fetch_all(
    client: &aws_sdk_cloudformation::Client,
    stack_names: &[String],
) -> Result<StackOutputs, Error> {
    return fetch_with(stack_names, |stack_name| {
        let stack = DeployedStack::new(stack_name, client.clone());
        async move { stack.get_outputs().await }
    })
    .await;
}

async fn fetch_with<F, Fut>(stack_names: &[String], fetch: F) -> Result<StackOutputs, Error>
where
    F: Fn(&str) -> Fut,
    Fut: Future<Output = Result<BTreeMap<String, String>, Error>>,
{
    let requests = stack_names.iter().map(|stack_name| {
        let request = fetch(stack_name.as_str());
        async move {
            let outputs = request.await?;
            tracing::info!(
                stack = %stack_name,
                outputs = outputs.len(),
                "fetched stack outputs"
            );

            Ok::<_, Error>((stack_name.clone(), outputs))
        }
    });

    let outputs = futures::future::try_join_all(requests).await?;
    return Ok(outputs.into_iter().collect());
}
