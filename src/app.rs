//! Composes the four stacks in dependency order: network, cluster, worker, master.

use serde::Serialize;
use std::fmt;

use crate::asset::DockerImageAsset;
use crate::config::Settings;
use crate::ecs::Ecs;
use crate::environment::DeployEnvironment;
use crate::master::JenkinsMaster;
use crate::network::Network;
use crate::template::{self, Stack};
use crate::worker::JenkinsWorker;

const NETWORK: &str = "Network";
const ECS: &str = "Ecs";
const WORKER: &str = "Worker";
const MASTER: &str = "Master";

/// Names of the stacks, in the order they are composed.
pub fn stack_names(settings: &Settings) -> Vec<String> {
    [NETWORK, ECS, WORKER, MASTER]
        .iter()
        .map(|suffix| settings.stack_name(suffix))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Nothing grants the worker task role any permission; worker jobs that
    /// call AWS APIs will be denied.
    WorkerTaskRoleWithoutPermissions { stack: String },
    EnvironmentAgnostic { missing: Vec<String> },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::WorkerTaskRoleWithoutPermissions { stack } => write!(
                f,
                "the worker task role in {} has no permissions; grant them if worker jobs call AWS",
                stack
            ),
            Warning::EnvironmentAgnostic { missing } => write!(
                f,
                "no {} given; ARNs fall back to CloudFormation pseudo parameters",
                missing.join(" or ")
            ),
        }
    }
}

/// Everything one synthesis produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub environment: DeployEnvironment,
    pub stacks: Vec<Stack>,
    pub assets: Vec<DockerImageAsset>,
    pub warnings: Vec<Warning>,
}

pub fn synthesize(
    settings: &Settings,
    env: &DeployEnvironment,
) -> Result<Assembly, template::Error> {
    let network = Network::new(&settings.stack_name(NETWORK), &settings.network)?;
    let ecs = Ecs::new(
        &settings.stack_name(ECS),
        &settings.cluster,
        &settings.service_discovery_namespace,
        &network,
    )?;
    let worker = JenkinsWorker::new(&settings.stack_name(WORKER), &settings.worker, &network)?;
    let master = JenkinsMaster::new(
        &settings.stack_name(MASTER),
        &settings.master,
        &settings.worker,
        env,
        &network,
        &ecs,
        &worker,
    )?;

    let mut warnings = vec![];
    let missing = env.missing();
    if !missing.is_empty() {
        warnings.push(Warning::EnvironmentAgnostic {
            missing: missing.iter().map(|name| name.to_string()).collect(),
        });
    }
    if !worker.task_role().has_permissions() {
        warnings.push(Warning::WorkerTaskRoleWithoutPermissions {
            stack: worker.stack_name().to_string(),
        });
    }
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    let assets = vec![worker.image().clone(), master.image().clone()];
    tracing::info!(
        cluster = ecs.cluster_name(),
        compute = ?master.compute(),
        "synthesized Jenkins stacks"
    );

    Ok(Assembly {
        environment: env.clone(),
        stacks: vec![
            network.into_stack(),
            ecs.into_stack(),
            worker.into_stack(),
            master.into_stack(),
        ],
        assets,
        warnings,
    })
}
