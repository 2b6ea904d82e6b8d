//! DATP Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./datp.yaml` (current directory - highest priority)
//! 2. `~/.config/datp/datp.yaml` (user config directory)
//! 3. `/etc/datp/datp.yaml` (system - lowest priority)
//!
//! A section present in a higher priority file replaces the whole section
//! from lower priority files.
//!
//! # YAML Structure
//!
//! ```yaml
//! node:
//!   role: aggregator
//! aggregator:
//!   port: 9999
//!   scheduler_on: true
//!   function_on: true
//!   collector_address: 10.1.1.1
//! scheduler:
//!   maximum_hold_us: 1000
//!   minimum_hold_us: 500
//! routes:
//!   - destination: 10.1.1.1
//!     gateway: 10.1.1.3
//! ```

mod application;
mod node;

use crate::routing::StaticRoutes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use application::{ApplicationConfig, RouteConfig};
pub use node::{
    AggregatorConfig, BuffersConfig, CollectorConfig, NodeConfig, Role, SchedulerConfig,
    TreeConfig, DEFAULT_AGGREGATOR_PORT, DEFAULT_PROBE_PORT,
};

/// Default config filename.
const CONFIG_FILENAME: &str = "datp.yaml";

/// Largest `data_length` a header can carry.
const MAX_DATA_LENGTH: u16 = 255;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("merge function requires the scheduler")]
    FunctionWithoutScheduler,

    #[error("invalid hold times: minimum {minimum_us}us must be non-zero and at most maximum {maximum_us}us")]
    InvalidHoldTimes { maximum_us: u64, minimum_us: u64 },

    #[error("invalid application {application}: {reason}")]
    InvalidApplication { application: u8, reason: String },

    #[error("role {0} requires at least one application")]
    NoApplications(Role),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node section (`node.*`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeConfig>,

    /// Aggregator section (`aggregator.*`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<AggregatorConfig>,

    /// Scheduler section (`scheduler.*`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,

    /// Tree controller section (`tree.*`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<TreeConfig>,

    /// Collector section (`collector.*`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector: Option<CollectorConfig>,

    /// Internal buffers (`buffers.*`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffers: Option<BuffersConfig>,

    /// Source application streams (`applications`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<ApplicationConfig>,

    /// Static next-hop table (`routes`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns the merged config and the paths that were actually loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("/etc/datp").join(CONFIG_FILENAME));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("datp").join(CONFIG_FILENAME));
        }

        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Sections present in `other` replace the corresponding section here;
    /// lists replace when non-empty.
    pub fn merge(&mut self, other: Config) {
        if other.node.is_some() {
            self.node = other.node;
        }
        if other.aggregator.is_some() {
            self.aggregator = other.aggregator;
        }
        if other.scheduler.is_some() {
            self.scheduler = other.scheduler;
        }
        if other.tree.is_some() {
            self.tree = other.tree;
        }
        if other.collector.is_some() {
            self.collector = other.collector;
        }
        if other.buffers.is_some() {
            self.buffers = other.buffers;
        }
        if !other.applications.is_empty() {
            self.applications = other.applications;
        }
        if !other.routes.is_empty() {
            self.routes = other.routes;
        }
    }

    /// Check cross-field constraints before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let aggregator = self.aggregator();
        if !aggregator.scheduler_on && aggregator.function_on {
            return Err(ConfigError::FunctionWithoutScheduler);
        }

        let scheduler = self.scheduler();
        if scheduler.minimum_hold_us == 0 || scheduler.minimum_hold_us > scheduler.maximum_hold_us
        {
            return Err(ConfigError::InvalidHoldTimes {
                maximum_us: scheduler.maximum_hold_us,
                minimum_us: scheduler.minimum_hold_us,
            });
        }

        for app in &self.applications {
            let invalid = |reason: &str| ConfigError::InvalidApplication {
                application: app.application,
                reason: reason.to_string(),
            };
            if app.application == 0 {
                return Err(invalid("application id 0 is reserved"));
            }
            if app.data_length > MAX_DATA_LENGTH {
                return Err(invalid("data_length exceeds 255 bytes"));
            }
            if app.data_length % 4 != 0 {
                return Err(invalid("data_length is not a multiple of 4"));
            }
            if app.interval_ms == 0 {
                return Err(invalid("interval_ms must be non-zero"));
            }
        }

        if self.role() == Role::Source && self.applications.is_empty() {
            return Err(ConfigError::NoApplications(Role::Source));
        }

        Ok(())
    }

    pub fn role(&self) -> Role {
        self.node.as_ref().map(|node| node.role).unwrap_or_default()
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        self.aggregator.clone().unwrap_or_default()
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        self.scheduler.clone().unwrap_or_default()
    }

    pub fn tree(&self) -> TreeConfig {
        self.tree.clone().unwrap_or_default()
    }

    pub fn collector(&self) -> CollectorConfig {
        self.collector.clone().unwrap_or_default()
    }

    pub fn buffers(&self) -> BuffersConfig {
        self.buffers.clone().unwrap_or_default()
    }

    /// Build the static route table from `routes`.
    pub fn static_routes(&self) -> StaticRoutes {
        self.routes
            .iter()
            .map(|route| (route.destination, route.gateway))
            .collect()
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
