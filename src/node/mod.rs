//! DATP Node Entity
//!
//! Top-level structure of a running DATP instance. A node hosts exactly
//! one role (aggregator, collector or source) together with the UDP
//! transports that role needs, and drives the role's timers from the
//! tokio runtime.

mod handlers;
mod lifecycle;
#[cfg(test)]
mod tests;

use crate::aggregator::{Aggregator, AggregatorError};
use crate::application::SourceApplication;
use crate::collector::Collector;
use crate::config::{Config, ConfigError, Role};
use crate::transport::{DatagramSender, PacketRx, TransportError, TransportId, UdpTransport};
use crate::tree::RouteProbeController;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Transport carrying aggregated datagrams (or source traffic).
pub(crate) const DATA_TRANSPORT: TransportId = TransportId::new(1);

/// Collector transport receiving route probes.
pub(crate) const PROBE_TRANSPORT: TransportId = TransportId::new(2);

/// Errors related to node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node not started")]
    NotStarted,

    #[error("node already started")]
    AlreadyStarted,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),
}

/// Node operational state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Created but not started.
    Created,
    /// Starting up (binding transports).
    Starting,
    /// Fully operational.
    Running,
    /// Shutting down.
    Stopping,
    /// Stopped.
    Stopped,
}

impl NodeState {
    /// Check if node is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, NodeState::Running)
    }

    /// Check if node can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, NodeState::Created)
    }

    /// Check if node can be stopped.
    pub fn can_stop(&self) -> bool {
        matches!(self, NodeState::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Created => "created",
            NodeState::Starting => "starting",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Protocol state of the hosted role.
enum RoleState {
    Aggregator(Box<Aggregator>),
    Collector(Collector),
    Source(Vec<SourceApplication>),
}

impl RoleState {
    fn role(&self) -> Role {
        match self {
            RoleState::Aggregator(_) => Role::Aggregator,
            RoleState::Collector(_) => Role::Collector,
            RoleState::Source(_) => Role::Source,
        }
    }

    /// Earliest pending timer of the role.
    fn next_deadline(&self) -> Option<Duration> {
        match self {
            RoleState::Aggregator(aggregator) => aggregator.next_deadline(),
            RoleState::Collector(_) => None,
            RoleState::Source(apps) => apps.iter().filter_map(|app| app.next_deadline()).min(),
        }
    }

    /// Fire every role timer due at `now`.
    fn poll(&mut self, now: Duration, sender: &mut dyn DatagramSender) {
        match self {
            RoleState::Aggregator(aggregator) => aggregator.poll(now, sender),
            RoleState::Collector(_) => {}
            RoleState::Source(apps) => {
                for app in apps.iter_mut() {
                    app.poll(now, sender);
                }
            }
        }
    }
}

/// A running DATP node instance.
pub struct Node {
    // === Configuration ===
    /// Loaded configuration.
    config: Config,

    // === State ===
    /// Node operational state.
    state: NodeState,
    /// The hosted role.
    role: RoleState,

    // === Transports ===
    /// Bound transports, data transport first.
    transports: Vec<UdpTransport>,
    /// Packet channel receiver (taken by the RX loop).
    packet_rx: Option<PacketRx>,
}

impl Node {
    /// Create a new node from configuration.
    ///
    /// The configuration is validated and the role's protocol state is
    /// built; no socket is bound until `start()`.
    pub fn new(config: Config) -> Result<Self, NodeError> {
        config.validate()?;

        let role = match config.role() {
            Role::Aggregator => {
                let aggregator = config.aggregator();
                let tree = RouteProbeController::new(
                    aggregator.collector_address,
                    config.tree().probe_port,
                    Box::new(config.static_routes()),
                );
                RoleState::Aggregator(Box::new(Aggregator::from_config(
                    &aggregator,
                    &config.scheduler(),
                    Box::new(tree),
                )?))
            }
            Role::Collector => RoleState::Collector(Collector::new()),
            Role::Source => RoleState::Source(
                config
                    .applications
                    .iter()
                    .map(SourceApplication::new)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };

        Ok(Self {
            config,
            state: NodeState::Created,
            role,
            transports: Vec::new(),
            packet_rx: None,
        })
    }

    // === Configuration ===

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    // === State ===

    /// Get the node state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Check if node is operational.
    pub fn is_running(&self) -> bool {
        self.state.is_operational()
    }

    /// Role hosted by this node.
    pub fn role(&self) -> Role {
        self.role.role()
    }

    // === Role Access ===

    pub fn aggregator(&self) -> Option<&Aggregator> {
        match &self.role {
            RoleState::Aggregator(aggregator) => Some(&**aggregator),
            _ => None,
        }
    }

    pub fn collector(&self) -> Option<&Collector> {
        match &self.role {
            RoleState::Collector(collector) => Some(collector),
            _ => None,
        }
    }

    pub fn applications(&self) -> &[SourceApplication] {
        match &self.role {
            RoleState::Source(apps) => apps,
            _ => &[],
        }
    }

    // === Transports ===

    /// Number of bound transports.
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Local address of a bound transport.
    pub fn local_addr(&self, transport_id: TransportId) -> Option<SocketAddr> {
        self.transports
            .iter()
            .find(|t| t.transport_id() == transport_id)
            .and_then(|t| t.local_addr())
    }

    /// Local address of the data transport.
    pub fn data_addr(&self) -> Option<SocketAddr> {
        self.local_addr(DATA_TRANSPORT)
    }

    /// Local address of the collector probe transport.
    pub fn probe_addr(&self) -> Option<SocketAddr> {
        self.local_addr(PROBE_TRANSPORT)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("state", &self.state)
            .field("role", &self.role.role())
            .field("transports", &self.transports.len())
            .finish()
    }
}
