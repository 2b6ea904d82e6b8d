//! Node configuration sections.
//!
//! Role selection plus the per-component parameters: aggregator pipeline,
//! scheduler hold times, tree probing, collector ports and internal
//! buffers.

use crate::scheduler::{DEFAULT_MAXIMUM_HOLD, DEFAULT_MINIMUM_HOLD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Default aggregator port (`aggregator.port`, `collector.aggregator_port`).
pub const DEFAULT_AGGREGATOR_PORT: u16 = 9999;

pub use crate::tree::DEFAULT_PROBE_PORT;

// ============================================================================
// Role
// ============================================================================

/// What a node does in the aggregation tree (`node.role`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Receives, merges and forwards toward the collector.
    #[default]
    Aggregator,
    /// Root of the tree; consumes everything.
    Collector,
    /// Leaf that generates application messages.
    Source,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Aggregator => "aggregator",
            Role::Collector => "collector",
            Role::Source => "source",
        };
        write!(f, "{}", s)
    }
}

/// Node identity section (`node.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Role of this node (`node.role`).
    #[serde(default)]
    pub role: Role,
}

// ============================================================================
// Component Sections
// ============================================================================

/// Aggregator pipeline (`aggregator.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Port to receive on and to forward to (`aggregator.port`).
    #[serde(default = "AggregatorConfig::default_port")]
    pub port: u16,
    /// Buffer messages in the scheduler (`aggregator.scheduler_on`).
    #[serde(default = "AggregatorConfig::default_scheduler_on")]
    pub scheduler_on: bool,
    /// Merge same-application messages (`aggregator.function_on`).
    #[serde(default = "AggregatorConfig::default_function_on")]
    pub function_on: bool,
    /// Collector the tree is rooted at (`aggregator.collector_address`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_address: Option<Ipv4Addr>,
    /// Local bind address (`aggregator.bind_addr`).
    #[serde(default = "AggregatorConfig::default_bind_addr")]
    pub bind_addr: Ipv4Addr,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_AGGREGATOR_PORT,
            scheduler_on: true,
            function_on: true,
            collector_address: None,
            bind_addr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl AggregatorConfig {
    fn default_port() -> u16 { DEFAULT_AGGREGATOR_PORT }
    fn default_scheduler_on() -> bool { true }
    fn default_function_on() -> bool { true }
    fn default_bind_addr() -> Ipv4Addr { Ipv4Addr::UNSPECIFIED }

    /// Socket address the aggregator binds.
    pub fn bind_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_addr, self.port))
    }
}

/// Scheduler hold times (`scheduler.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Longest a message waits for a merge partner, in microseconds
    /// (`scheduler.maximum_hold_us`).
    #[serde(default = "SchedulerConfig::default_maximum_hold_us")]
    pub maximum_hold_us: u64,
    /// Remaining hold under which a message joins a sweep, in microseconds
    /// (`scheduler.minimum_hold_us`).
    #[serde(default = "SchedulerConfig::default_minimum_hold_us")]
    pub minimum_hold_us: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maximum_hold_us: Self::default_maximum_hold_us(),
            minimum_hold_us: Self::default_minimum_hold_us(),
        }
    }
}

impl SchedulerConfig {
    fn default_maximum_hold_us() -> u64 { DEFAULT_MAXIMUM_HOLD.as_micros() as u64 }
    fn default_minimum_hold_us() -> u64 { DEFAULT_MINIMUM_HOLD.as_micros() as u64 }

    pub fn maximum_hold(&self) -> Duration {
        Duration::from_micros(self.maximum_hold_us)
    }

    pub fn minimum_hold(&self) -> Duration {
        Duration::from_micros(self.minimum_hold_us)
    }
}

/// Tree controller (`tree.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Collector port route probes are sent to (`tree.probe_port`).
    #[serde(default = "TreeConfig::default_probe_port")]
    pub probe_port: u16,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            probe_port: DEFAULT_PROBE_PORT,
        }
    }
}

impl TreeConfig {
    fn default_probe_port() -> u16 { DEFAULT_PROBE_PORT }
}

/// Collector endpoints (`collector.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Port aggregated datagrams arrive on (`collector.aggregator_port`).
    #[serde(default = "CollectorConfig::default_aggregator_port")]
    pub aggregator_port: u16,
    /// Port route probes arrive on (`collector.probe_port`).
    #[serde(default = "CollectorConfig::default_probe_port")]
    pub probe_port: u16,
    /// Local bind address (`collector.bind_addr`).
    #[serde(default = "CollectorConfig::default_bind_addr")]
    pub bind_addr: Ipv4Addr,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            aggregator_port: DEFAULT_AGGREGATOR_PORT,
            probe_port: DEFAULT_PROBE_PORT,
            bind_addr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl CollectorConfig {
    fn default_aggregator_port() -> u16 { DEFAULT_AGGREGATOR_PORT }
    fn default_probe_port() -> u16 { DEFAULT_PROBE_PORT }
    fn default_bind_addr() -> Ipv4Addr { Ipv4Addr::UNSPECIFIED }
}

/// Internal buffers (`buffers.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuffersConfig {
    /// Transport to node packet channel capacity (`buffers.packet_channel`).
    #[serde(default = "BuffersConfig::default_packet_channel")]
    pub packet_channel: usize,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            packet_channel: 1024,
        }
    }
}

impl BuffersConfig {
    fn default_packet_channel() -> usize { 1024 }
}
