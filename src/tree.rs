//! Aggregation Tree Controller
//!
//! Each aggregator forwards toward a single parent: the next hop on the
//! route to the collector. The tree controller keeps that parent current by
//! periodically asking the routing layer for the route to the collector.

use crate::routing::{RouteError, RouteLookup};
use crate::transport::DatagramSender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default collector port for route probes.
pub const DEFAULT_PROBE_PORT: u16 = 10000;

/// Size of a route probe datagram.
pub const PROBE_SIZE: usize = 12;

/// Parent change reported to the owner of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeEvent {
    ParentChanged {
        previous: Option<Ipv4Addr>,
        parent: Ipv4Addr,
    },
}

/// Controller lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeState {
    /// Not started; no probe timer.
    Unbound,
    /// Probe timer armed.
    Probing,
    /// Stopped; no further probes fire.
    Stopped,
}

impl TreeState {
    pub fn can_start(&self) -> bool {
        matches!(self, TreeState::Unbound | TreeState::Stopped)
    }

    pub fn is_probing(&self) -> bool {
        matches!(self, TreeState::Probing)
    }
}

impl fmt::Display for TreeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeState::Unbound => "unbound",
            TreeState::Probing => "probing",
            TreeState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Probe counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub probes_sent: u64,
    pub probe_failures: u64,
    pub gateway_changes: u64,
    pub route_failures: u64,
}

/// Next-hop discovery toward the collector.
pub trait TreeController {
    /// Arm the probe timer. Has no effect unless the controller can start.
    fn start(&mut self, now: Duration);

    /// Cancel the probe timer.
    fn stop(&mut self);

    fn state(&self) -> TreeState;

    /// Current parent, `None` until a route has been learned.
    fn parent(&self) -> Option<Ipv4Addr>;

    fn next_deadline(&self) -> Option<Duration>;

    /// Fire the probe timer if it is due at `now`.
    fn poll(&mut self, now: Duration, sender: &mut dyn DatagramSender) -> Option<TreeEvent>;

    fn stats(&self) -> TreeStats;
}

/// Tree controller backed by an on-demand routing protocol.
///
/// A loopback gateway means the routing layer has no route yet, so a small
/// probe is sent to the collector to make it discover one. Any other
/// gateway that differs from the current parent becomes the new parent.
pub struct RouteProbeController {
    collector: Option<Ipv4Addr>,
    probe_port: u16,
    routes: Box<dyn RouteLookup>,
    rng: StdRng,
    state: TreeState,
    parent: Option<Ipv4Addr>,
    probe_period: Duration,
    next_probe: Option<Duration>,
    stats: TreeStats,
}

impl RouteProbeController {
    pub fn new(collector: Option<Ipv4Addr>, probe_port: u16, routes: Box<dyn RouteLookup>) -> Self {
        Self::with_rng(collector, probe_port, routes, StdRng::from_entropy())
    }

    /// Create a controller with an explicit random source for probe jitter.
    pub fn with_rng(
        collector: Option<Ipv4Addr>,
        probe_port: u16,
        routes: Box<dyn RouteLookup>,
        rng: StdRng,
    ) -> Self {
        Self {
            collector,
            probe_port,
            routes,
            rng,
            state: TreeState::Unbound,
            parent: None,
            probe_period: Duration::ZERO,
            next_probe: None,
            stats: TreeStats::default(),
        }
    }

    pub fn collector(&self) -> Option<Ipv4Addr> {
        self.collector
    }

    pub fn probe_period(&self) -> Duration {
        self.probe_period
    }

    /// Query the route to the collector and act on its gateway.
    pub fn send_route_probe(&mut self, sender: &mut dyn DatagramSender) -> Option<TreeEvent> {
        let Some(collector) = self.collector else {
            debug!("No collector configured, skipping route probe");
            return None;
        };

        let route = match self.routes.route_to(collector) {
            Ok(route) => route,
            Err(RouteError::NoRoute(_)) => {
                self.stats.route_failures += 1;
                debug!(collector = %collector, "No route to collector");
                return None;
            }
            Err(e) => {
                self.stats.route_failures += 1;
                warn!(collector = %collector, error = %e, "Route lookup failed");
                return None;
            }
        };

        debug!(
            destination = %route.destination,
            gateway = %route.gateway,
            source = %route.source,
            "Route to collector"
        );

        if route.is_loopback() {
            let to = SocketAddr::V4(SocketAddrV4::new(collector, self.probe_port));
            match sender.send_to(&[0u8; PROBE_SIZE], to) {
                Ok(_) => {
                    self.stats.probes_sent += 1;
                    debug!(probes_sent = self.stats.probes_sent, "Route probe sent");
                }
                Err(e) => {
                    self.stats.probe_failures += 1;
                    info!(error = %e, "Error while sending route probe");
                }
            }
            return None;
        }

        if self.parent == Some(route.gateway) {
            return None;
        }

        let previous = self.parent.replace(route.gateway);
        self.stats.gateway_changes += 1;
        debug!(
            gateway = %route.gateway,
            gateway_changes = self.stats.gateway_changes,
            "Parent aggregator updated"
        );
        Some(TreeEvent::ParentChanged {
            previous,
            parent: route.gateway,
        })
    }
}

impl TreeController for RouteProbeController {
    fn start(&mut self, now: Duration) {
        if !self.state.can_start() {
            return;
        }
        if self.collector.is_none() {
            warn!("Tree controller started without a collector address");
        }

        // Period 500-1000 ms, first probe 1-5 s after start.
        self.probe_period = Duration::from_millis(self.rng.gen_range(50..=100u64) * 10);
        let start_delay = Duration::from_millis(self.rng.gen_range(0..=40u64) * 100 + 1000);
        self.next_probe = Some(now + start_delay);
        self.state = TreeState::Probing;

        debug!(
            start_delay_ms = start_delay.as_millis() as u64,
            period_ms = self.probe_period.as_millis() as u64,
            "Tree controller started"
        );
    }

    fn stop(&mut self) {
        if self.state.is_probing() {
            debug!("Tree controller stopped");
        }
        self.next_probe = None;
        self.state = TreeState::Stopped;
    }

    fn state(&self) -> TreeState {
        self.state
    }

    fn parent(&self) -> Option<Ipv4Addr> {
        self.parent
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.next_probe
    }

    fn poll(&mut self, now: Duration, sender: &mut dyn DatagramSender) -> Option<TreeEvent> {
        let deadline = self.next_probe.filter(|deadline| *deadline <= now)?;
        let event = self.send_route_probe(sender);
        self.next_probe = Some(deadline + self.probe_period);
        event
    }

    fn stats(&self) -> TreeStats {
        self.stats
    }
}
