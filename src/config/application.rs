//! Source application and static route entries.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use super::node::DEFAULT_AGGREGATOR_PORT;

/// One periodic message stream generated by a source node (`applications[]`).
///
/// ```yaml
/// applications:
///   - application: 1
///     interval_ms: 100
///     data_length: 20
///     peer: 10.1.1.2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application id carried in every header, 1..=255.
    pub application: u8,
    /// Send interval in milliseconds.
    pub interval_ms: u64,
    /// Payload bytes per message; a multiple of 4, at most 255.
    pub data_length: u16,
    #[serde(default)]
    pub priority: u8,
    /// First-hop aggregator.
    pub peer: Ipv4Addr,
    #[serde(default = "ApplicationConfig::default_port")]
    pub port: u16,
}

impl ApplicationConfig {
    fn default_port() -> u16 { DEFAULT_AGGREGATOR_PORT }

    /// Reference stream presets: 1 is 20 bytes every 100 ms, 2 is 60 bytes
    /// every 500 ms, 3 is 40 bytes every second.
    pub fn preset(application: u8, peer: Ipv4Addr) -> Option<Self> {
        let (interval_ms, data_length) = match application {
            1 => (100, 20),
            2 => (500, 60),
            3 => (1000, 40),
            _ => return None,
        };
        Some(Self {
            application,
            interval_ms,
            data_length,
            priority: 0,
            peer,
            port: DEFAULT_AGGREGATOR_PORT,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.peer, self.port))
    }
}

/// Static next-hop entry (`routes[]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub destination: Ipv4Addr,
    pub gateway: Ipv4Addr,
}
