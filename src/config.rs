use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::{fs, io, path::Path};
use validator::{Validate, ValidationError};

use crate::environment::DeployEnvironment;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

const FARGATE_CPU_UNITS: [u32; 5] = [256, 512, 1024, 2048, 4096];
const LOG_RETENTION_DAYS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Settings {
    #[validate(length(min = 1))]
    pub base_stack_name: String,

    #[validate(custom = "validate_dns_label")]
    pub service_discovery_namespace: String,

    pub environment: DeployEnvironment,

    #[validate]
    pub network: NetworkSettings,

    #[validate]
    pub cluster: ClusterSettings,

    #[validate]
    pub worker: WorkerSettings,

    #[validate]
    pub master: MasterSettings,
}

impl Default for Settings {
    fn default() -> Self {
        return Self {
            base_stack_name: String::from("Jenkins"),
            service_discovery_namespace: String::from("jenkins"),
            environment: DeployEnvironment::default(),
            network: NetworkSettings::default(),
            cluster: ClusterSettings::default(),
            worker: WorkerSettings::default(),
            master: MasterSettings::default(),
        };
    }
}

impl Settings {
    pub fn stack_name(&self, suffix: &str) -> String {
        return format!("{}{}", self.base_stack_name, suffix);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_subnet_mask"))]
pub struct NetworkSettings {
    #[validate(custom = "validate_cidr")]
    pub cidr: String,

    #[validate(range(min = 1, max = 3))]
    pub max_azs: u8,

    /// Prefix length of every subnet carved out of the VPC block.
    #[validate(range(min = 16, max = 28))]
    pub subnet_mask: u8,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        return Self {
            cidr: String::from("10.0.0.0/24"),
            max_azs: 2,
            subnet_mask: 26,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClusterSettings {
    #[validate(length(min = 1))]
    pub name: String,

    /// EC2 capacity with a shared EFS filesystem. Without it the master runs on Fargate.
    #[validate]
    pub capacity: Option<CapacitySettings>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        return Self {
            name: String::from("jenkins"),
            capacity: None,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CapacitySettings {
    #[validate(length(min = 1))]
    pub instance_type: String,

    pub key_name: Option<String>,

    #[validate(range(min = 1, max = 10))]
    pub desired_capacity: u32,
}

impl Default for CapacitySettings {
    fn default() -> Self {
        return Self {
            instance_type: String::from("t3.xlarge"),
            key_name: Some(String::from("jenkinsonaws")),
            desired_capacity: 1,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ImageSettings {
    #[validate(length(min = 1))]
    pub repository_name: String,

    /// Docker build context, relative to where the assembly is deployed from.
    #[validate(length(min = 1))]
    pub directory: String,

    #[validate(length(min = 1))]
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_worker"))]
pub struct WorkerSettings {
    #[validate]
    pub image: ImageSettings,

    pub log_retention_days: u32,

    /// Family-name prefix of the task definitions the master may run.
    #[validate(length(min = 1))]
    pub task_definition_prefix: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        return Self {
            image: ImageSettings {
                repository_name: String::from("jenkins/worker"),
                directory: String::from("../docker/worker/"),
                tag: String::from("latest"),
            },
            log_retention_days: 1,
            task_definition_prefix: String::from("fargate-workers"),
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerMode {
    /// Load balancer, listener and target group created together with service defaults.
    Managed,
    /// Target group with explicit health-check settings, wired to the listener through a rule.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_master"))]
pub struct MasterSettings {
    #[validate]
    pub image: ImageSettings,

    #[validate(length(min = 1))]
    pub family: String,

    pub cpu: u32,

    #[validate(range(min = 512, max = 30720))]
    pub memory_mib: u32,

    #[validate(length(min = 1))]
    pub service_name: String,

    #[validate(range(max = 1))]
    pub desired_count: u32,

    #[validate(custom = "validate_dns_label")]
    pub discovery_name: String,

    pub load_balancer: LoadBalancerMode,

    pub health_check_path: String,
}

impl Default for MasterSettings {
    fn default() -> Self {
        return Self {
            image: ImageSettings {
                repository_name: String::from("jenkins/master"),
                directory: String::from("../docker/master/"),
                tag: String::from("latest"),
            },
            family: String::from("jenkins"),
            cpu: 512,
            memory_mib: 2048,
            service_name: String::from("jenkins-svc"),
            desired_count: 1,
            discovery_name: String::from("master"),
            load_balancer: LoadBalancerMode::Managed,
            health_check_path: String::from("/login"),
        };
    }
}

/// Reads the settings file, or returns validated defaults when no file is given.
pub fn load(path: Option<&Path>) -> Result<Settings, Error> {
    if let Some(path) = path {
        return parse(path);
    }

    let settings = Settings::default();
    validate_settings(&settings)?;

    return Ok(settings);
}

pub fn parse(path: &Path) -> Result<Settings, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let settings: Settings = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    validate_settings(&settings)?;
    tracing::debug!(path = %path.display(), "loaded settings");

    return Ok(settings);
}

fn validate_settings(settings: &Settings) -> Result<(), Error> {
    return settings
        .validate()
        .map_err(|error| Error::ValidationError(error.to_string()));
}

fn parse_cidr(cidr: &str) -> Option<(Ipv4Addr, u8)> {
    let (address, prefix) = cidr.split_once('/')?;
    let address: Ipv4Addr = address.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }

    return Some((address, prefix));
}

fn validate_cidr(cidr: &str) -> Result<(), ValidationError> {
    let (address, prefix) = match parse_cidr(cidr) {
        Some(parsed) => parsed,
        None => return Err(ValidationError::new("The CIDR has to look like `10.0.0.0/24`")),
    };
    if !(16..=28).contains(&prefix) {
        return Err(ValidationError::new(
            "The VPC prefix length has to be between 16 and 28",
        ));
    }

    let host_mask = u32::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
    if u32::from(address) & host_mask != 0 {
        return Err(ValidationError::new(
            "The CIDR address has host bits set",
        ));
    }

    return Ok(());
}

fn validate_subnet_mask(network: &NetworkSettings) -> Result<(), ValidationError> {
    let prefix = match parse_cidr(&network.cidr) {
        Some((_, prefix)) => prefix,
        // reported by the field validator
        None => return Ok(()),
    };
    if network.subnet_mask <= prefix {
        return Err(ValidationError::new(
            "The subnet mask has to be longer than the VPC prefix",
        ));
    }

    let available = 1u32 << (network.subnet_mask - prefix);
    if available < 2 * u32::from(network.max_azs) {
        return Err(ValidationError::new(
            "The VPC block is too small for a public and a private subnet per AZ",
        ));
    }

    return Ok(());
}

fn validate_dns_label(label: &str) -> Result<(), ValidationError> {
    let valid = !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(ValidationError::new(
            "Names used in DNS have to be lowercase letters, digits and dashes",
        ));
    }

    return Ok(());
}

fn validate_worker(worker: &WorkerSettings) -> Result<(), ValidationError> {
    if !LOG_RETENTION_DAYS.contains(&worker.log_retention_days) {
        return Err(ValidationError::new(
            "The log retention is not a value CloudWatch Logs accepts",
        ));
    }

    return Ok(());
}

fn validate_master(master: &MasterSettings) -> Result<(), ValidationError> {
    if !FARGATE_CPU_UNITS.contains(&master.cpu) {
        return Err(ValidationError::new(
            "The master CPU has to be one of 256, 512, 1024, 2048 or 4096",
        ));
    }
    if !master.health_check_path.starts_with('/') {
        return Err(ValidationError::new(
            "The health check path has to start with `/`",
        ));
    }

    return Ok(());
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use super::load;
    use super::parse;
    use super::Error;
    use super::LoadBalancerMode;
    use super::Settings;
    use tempfile::tempdir;

    fn write_settings(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("jenkins.yaml");

        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "{}", contents).unwrap();

        (dir, file_path)
    }

    #[test]
    fn file_does_not_exist() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("jenkins.yaml");

        let result = parse(&file_path);
        assert_eq!(true, result.is_err());
        match result.err().unwrap() {
            Error::FileNotFound(_) => {}
            _ => panic!("Expected `FileNotFound` error"),
        }
    }

    #[test]
    fn file_wrong_format() {
        let (_dir, file_path) = write_settings("- Not a mapping");

        let result = parse(&file_path);
        assert_eq!(true, result.is_err());
        match result.err().unwrap() {
            Error::ParsingError(_) => {}
            _ => panic!("Expected `ParsingError` error"),
        }
    }

    #[test]
    fn file_invalid_cidr() {
        let (_dir, file_path) = write_settings("network:\n  cidr: 10.0.0.1/24");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_subnet_mask_too_short() {
        let (_dir, file_path) = write_settings("network:\n  cidr: 10.0.0.0/24\n  subnet_mask: 24");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_unsupported_cpu() {
        let (_dir, file_path) = write_settings("master:\n  cpu: 300");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_unsupported_log_retention() {
        let (_dir, file_path) = write_settings("worker:\n  log_retention_days: 2");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_vpc_too_small_for_all_azs() {
        let (_dir, file_path) =
            write_settings("network:\n  cidr: 10.0.0.0/24\n  max_azs: 3\n  subnet_mask: 26");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_uppercase_namespace() {
        let (_dir, file_path) = write_settings("service_discovery_namespace: Jenkins");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_discovery_name_leading_dash() {
        let (_dir, file_path) = write_settings("master:\n  discovery_name: -x");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_relative_health_check_path() {
        let (_dir, file_path) = write_settings("master:\n  health_check_path: login");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_memory_out_of_range() {
        let (_dir, file_path) = write_settings("master:\n  memory_mib: 256");

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn parses_partial_settings_over_defaults() {
        let (_dir, file_path) = write_settings(concat!(
            "base_stack_name: Ci\n",
            "environment:\n  region: us-east-1\n",
            "cluster:\n  name: jenkins\n  capacity:\n    instance_type: t3.large\n",
            "master:\n  load_balancer: manual",
        ));

        let settings = parse(&file_path).unwrap();
        assert_eq!("CiNetwork", settings.stack_name("Network"));
        assert_eq!(Some(String::from("us-east-1")), settings.environment.region);
        assert_eq!(LoadBalancerMode::Manual, settings.master.load_balancer);

        let capacity = settings.cluster.capacity.unwrap();
        assert_eq!("t3.large", capacity.instance_type);
        assert_eq!(Some(String::from("jenkinsonaws")), capacity.key_name);
        assert_eq!("10.0.0.0/24", settings.network.cidr);
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(Ok(Settings::default()), load(None));
    }

    #[test]
    fn defaults_survive_a_round_trip() {
        let contents = serde_yaml::to_string(&Settings::default()).unwrap();
        let (_dir, file_path) = write_settings(&contents);

        assert_eq!(Settings::default(), parse(&file_path).unwrap());
    }
}
