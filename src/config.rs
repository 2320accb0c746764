//! Plugin configuration.
//!
//! Values are merged from several sources, lowest precedence first: built-in
//! defaults, `efa-platform.toml`, `efa-platform.yaml`, then `OFI_NCCL_*`
//! environment variables. Unset optional fields mean "no explicit override"
//! and let platform initialization pick a value.

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::env_vars::PLUGIN_PREFIX;
use crate::constants::paths::{INFINIBAND_CLASS_DIR, PRODUCT_NAME_PATH, TOPOLOGY_DIR};
use crate::constants::transport::DEFAULT_EAGER_MAX_SIZE;
use crate::error::{PlatformError, Result};
use crate::platform::catalog::Protocol;

/// Configuration file names searched in the working directory.
pub const TOML_FILE: &str = "efa-platform.toml";
pub const YAML_FILE: &str = "efa-platform.yaml";

/// Serde helpers for boolean flags given as `true`/`false`, `0`/`1` or
/// `yes`/`no`, the forms accepted for environment parameters.
mod flag {
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    fn interpret<E: de::Error>(raw: Raw) -> Result<bool, E> {
        match raw {
            Raw::Bool(b) => Ok(b),
            Raw::Int(0) => Ok(false),
            Raw::Int(1) => Ok(true),
            Raw::Int(n) => Err(E::custom(format!("invalid flag value {}", n))),
            Raw::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(E::custom(format!("invalid flag value {:?}", other))),
            },
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        interpret(Raw::deserialize(deserializer)?)
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Raw>::deserialize(deserializer)?
            .map(interpret)
            .transpose()
    }
}

/// Accelerator flavour the plugin is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    /// GPU builds. Enables the NCCL-specific environment tuning.
    #[default]
    Nvidia,
    /// Trainium/Inferentia builds.
    Neuron,
}

fn default_product_name_path() -> PathBuf { PathBuf::from(PRODUCT_NAME_PATH) }
fn default_infiniband_class_dir() -> PathBuf { PathBuf::from(INFINIBAND_CLASS_DIR) }
fn default_topology_dir() -> PathBuf { PathBuf::from(TOPOLOGY_DIR) }
fn default_eager_max_size() -> usize { DEFAULT_EAGER_MAX_SIZE }
fn default_log_level() -> String { "info".to_string() }

/// Effective plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// File whose first line names the EC2 instance type
    #[serde(default = "default_product_name_path")]
    pub product_name_path: PathBuf,

    /// Root of the per-device `node_guid` files
    #[serde(default = "default_infiniband_class_dir")]
    pub infiniband_class_dir: PathBuf,

    /// Directory holding platform topology XML files
    #[serde(default = "default_topology_dir")]
    pub topology_dir: PathBuf,

    /// Explicit protocol override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,

    /// Latency override in microseconds; negative values mean unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_latency: Option<f32>,

    /// Duplicate connections per NIC; 0 defers to the platform default
    #[serde(default)]
    pub nic_dup_conns: u32,

    /// Explicit domain-per-thread policy
    #[serde(
        default,
        deserialize_with = "flag::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub domain_per_thread: Option<bool>,

    #[serde(default, deserialize_with = "flag::deserialize")]
    pub disable_gdr_required_check: bool,

    #[serde(default, deserialize_with = "flag::deserialize")]
    pub disable_native_rdma_check: bool,

    /// Largest message sent eagerly
    #[serde(default = "default_eager_max_size")]
    pub eager_max_size: usize,

    #[serde(default)]
    pub accelerator: Accelerator,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default, deserialize_with = "flag::deserialize")]
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            product_name_path: default_product_name_path(),
            infiniband_class_dir: default_infiniband_class_dir(),
            topology_dir: default_topology_dir(),
            protocol: None,
            net_latency: None,
            nic_dup_conns: 0,
            domain_per_thread: None,
            disable_gdr_required_check: false,
            disable_native_rdma_check: false,
            eager_max_size: default_eager_max_size(),
            accelerator: Accelerator::default(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. `OFI_NCCL_*` environment variables (highest priority)
    /// 2. efa-platform.yaml (if exists)
    /// 3. efa-platform.toml (if exists)
    /// 4. Built-in defaults (lowest priority)
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment(Path::new(TOML_FILE), Path::new(YAML_FILE)))
    }

    /// The merged provider chain, reading files from the given paths.
    pub fn figment(toml_path: &Path, yaml_path: &Path) -> Figment {
        Self::default_figment()
            .merge(Toml::file(toml_path))
            .merge(Yaml::file(yaml_path))
            .merge(Env::prefixed(PLUGIN_PREFIX))
    }

    /// Generate default configuration values
    pub fn default_figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    /// Extract and validate a configuration from `figment`.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| PlatformError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Latency override, if one was given.
    pub fn latency_override(&self) -> Option<f32> {
        self.net_latency.filter(|latency| *latency >= 0.0)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.net_latency.is_some_and(f32::is_nan) {
            return Err(PlatformError::Config(
                "OFI_NCCL_NET_LATENCY must be a number".to_string(),
            ));
        }

        if self.eager_max_size == 0 {
            return Err(PlatformError::Config(
                "OFI_NCCL_EAGER_MAX_SIZE must be greater than zero".to_string(),
            ));
        }

        for (path, name) in [
            (&self.product_name_path, "OFI_NCCL_PRODUCT_NAME_PATH"),
            (&self.infiniband_class_dir, "OFI_NCCL_INFINIBAND_CLASS_DIR"),
            (&self.topology_dir, "OFI_NCCL_TOPOLOGY_DIR"),
        ] {
            if path.as_os_str().is_empty() {
                return Err(PlatformError::Config(format!("{} cannot be empty", name)));
            }
        }

        Ok(())
    }

    /// Export configuration to TOML format
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PlatformError::Config(format!("Failed to serialize to TOML: {}", e)))
    }

    /// Export configuration to YAML format
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| PlatformError::Config(format!("Failed to serialize to YAML: {}", e)))
    }
}
