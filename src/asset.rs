use serde::Serialize;
use serde_json::Value;

use crate::config::ImageSettings;
use crate::template;

/// A container image built from a local directory and pushed to ECR by the
/// deployment tooling before the stacks are deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DockerImageAsset {
    pub id: String,
    pub repository_name: String,
    pub directory: String,
    pub image_tag: String,
}

impl DockerImageAsset {
    pub fn new(id: &str, settings: &ImageSettings) -> Self {
        Self {
            id: id.to_string(),
            repository_name: settings.repository_name.clone(),
            directory: settings.directory.clone(),
            image_tag: settings.tag.clone(),
        }
    }

    /// Image URI in the deploying account's registry.
    pub fn image_uri(&self) -> Value {
        template::sub(&format!(
            "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/{}:{}",
            self.repository_name, self.image_tag
        ))
    }
}
