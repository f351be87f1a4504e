// Configuration file support.
//
// Grounded on `config.rs` (struct-with-`#[serde(default)]`
// shape, `Config::load`/`validate` split) but the wire format is YAML per
// spec (`serde_yaml`, matching `NexusQuantum-NQRust-MicroVM`'s manager app)
// rather than TOML, and the schema itself follows
// `original_source/server/config.go`.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pull_policy() -> ImagePullPolicy {
    ImagePullPolicy::IfNotPresent
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    pub metrics: MetricsConfig,

    pub basic_auth_enabled: bool,

    pub basic_auth_users: HashMap<String, String>,

    pub github: GitHubConfig,

    pub pools: Vec<PoolConfig>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics: MetricsConfig::default(),
            basic_auth_enabled: false,
            basic_auth_users: HashMap::new(),
            github: GitHubConfig::default(),
            pools: Vec::new(),
            log_level: default_log_level(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHubConfig {
    pub app_id: i64,
    pub app_private_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePullPolicy {
    Always,
    Never,
    #[serde(rename = "ifnotpresent")]
    IfNotPresent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    pub name_prefix: String,
    pub image_ref: String,
    #[serde(default = "default_pull_policy")]
    pub image_pull_policy: ImagePullPolicy,
    pub organization: String,
    pub group_id: i64,
    pub labels: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "runner".to_string(),
            image_ref: String::new(),
            image_pull_policy: default_pull_policy(),
            organization: String::new(),
            group_id: 1,
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MachineConfig {
    pub vcpu_count: u8,
    pub mem_mib: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            vcpu_count: 1,
            mem_mib: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Scalar(String),
    Map(HashMap<String, MetadataValue>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FirecrackerConfig {
    pub binary_path: String,
    pub kernel_image_path: String,
    pub kernel_args: String,
    pub machine_config: MachineConfig,
    pub metadata: HashMap<String, MetadataValue>,
}

impl Default for FirecrackerConfig {
    fn default() -> Self {
        Self {
            binary_path: "firecracker".to_string(),
            kernel_image_path: String::new(),
            kernel_args: "console=ttyS0 reboot=k panic=1 pci=off".to_string(),
            machine_config: MachineConfig::default(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub name: String,
    pub max_runners: u32,
    pub min_runners: u32,
    pub runner: RunnerConfig,
    pub firecracker: FirecrackerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_runners: 1,
            min_runners: 1,
            runner: RunnerConfig::default(),
            firecracker: FirecrackerConfig::default(),
        }
    }
}

impl PoolConfig {
    fn validate(&self, errors: &mut Vec<String>) {
        if self.name.is_empty() {
            errors.push("pools[].name must not be empty".to_string());
        }
        if self.max_runners < 1 {
            errors.push(format!("pools[{}].max_runners must be >= 1", self.name));
        }
        if self.min_runners < 1 {
            errors.push(format!("pools[{}].min_runners must be >= 1", self.name));
        }
        if self.min_runners > self.max_runners {
            errors.push(format!(
                "pools[{}].min_runners ({}) must be <= max_runners ({})",
                self.name, self.min_runners, self.max_runners
            ));
        }
        if self.runner.name_prefix.is_empty() {
            errors.push(format!("pools[{}].runner.name_prefix must not be empty", self.name));
        }
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "fatal", "panic"];

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigInvalid(format!("failed to read config file {:?}: {}", path, e))
        })?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| Error::ConfigInvalid(format!("failed to parse config file {:?}: {}", path, e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration tree, collecting every field-level error.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("bind_address must not be empty".to_string());
        }

        if self.metrics.enabled && self.metrics.address.is_empty() {
            errors.push("metrics.address is required when metrics.enabled is true".to_string());
        }

        if self.basic_auth_enabled && self.basic_auth_users.is_empty() {
            errors.push("basic_auth_users is required when basic_auth_enabled is true".to_string());
        }

        if self.pools.is_empty() {
            errors.push("pools must contain at least one entry".to_string());
        }

        let mut seen_names = std::collections::HashSet::new();
        for pool in &self.pools {
            pool.validate(&mut errors);
            if !seen_names.insert(pool.name.clone()) {
                errors.push(format!("duplicate pool name: {}", pool.name));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got {}",
                VALID_LOG_LEVELS, self.log_level
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigInvalid(errors.join("; ")))
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" | "fatal" | "panic" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}
