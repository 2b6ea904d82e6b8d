//! Node lifecycle management: start and stop.

use super::{Node, NodeError, NodeState, RoleState, DATA_TRANSPORT, PROBE_TRANSPORT};
use crate::transport::{packet_channel, unix_time, TransportId, UdpTransport};
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{debug, info, warn};

impl Node {
    /// Endpoints the hosted role listens on.
    fn transport_plan(&self) -> Vec<(TransportId, &'static str, SocketAddr)> {
        match &self.role {
            RoleState::Aggregator(_) => vec![(
                DATA_TRANSPORT,
                "aggregator",
                self.config.aggregator().bind_socket_addr(),
            )],
            RoleState::Collector(_) => {
                let collector = self.config.collector();
                let bind = collector.bind_addr.into();
                vec![
                    (
                        DATA_TRANSPORT,
                        "aggregator",
                        SocketAddr::new(bind, collector.aggregator_port),
                    ),
                    (
                        PROBE_TRANSPORT,
                        "probe",
                        SocketAddr::new(bind, collector.probe_port),
                    ),
                ]
            }
            RoleState::Source(_) => vec![(
                DATA_TRANSPORT,
                "source",
                SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            )],
        }
    }

    // === State Transitions ===

    /// Start the node.
    ///
    /// Binds the role's transports, then starts the role's timers. If any
    /// transport fails to bind, the ones already bound are closed and the
    /// node ends up stopped.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if !self.state.can_start() {
            return Err(NodeError::AlreadyStarted);
        }
        self.state = NodeState::Starting;

        // Create packet channel for transport -> Node communication
        let (packet_tx, packet_rx) = packet_channel(self.config.buffers().packet_channel);
        self.packet_rx = Some(packet_rx);

        for (transport_id, name, bind_addr) in self.transport_plan() {
            let mut transport = UdpTransport::new(transport_id, name, bind_addr, packet_tx.clone());
            if let Err(e) = transport.start_async().await {
                warn!(name, bind_addr = %bind_addr, error = %e, "Transport failed to start");
                self.shutdown_transports().await;
                self.packet_rx = None;
                self.state = NodeState::Stopped;
                return Err(e.into());
            }
            self.transports.push(transport);
        }

        let now = unix_time();
        match &mut self.role {
            RoleState::Aggregator(aggregator) => aggregator.start(now)?,
            RoleState::Collector(collector) => collector.start(),
            RoleState::Source(apps) => {
                for app in apps.iter_mut() {
                    app.start(now);
                }
            }
        }

        self.state = NodeState::Running;
        info!("Node started:");
        info!("       state: {}", self.state);
        info!("        role: {}", self.role());
        info!("  transports: {}", self.transports.len());
        Ok(())
    }

    /// Stop the node.
    ///
    /// Cancels every role timer, drops buffered messages and closes the
    /// transports.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        if !self.state.can_stop() {
            return Err(NodeError::NotStarted);
        }
        self.state = NodeState::Stopping;
        info!(state = %self.state, "Node stopping");

        match &mut self.role {
            RoleState::Aggregator(aggregator) => {
                aggregator.stop();
                let stats = aggregator.stats();
                info!(
                    packets_received = stats.packets_received,
                    messages_received = stats.messages_received,
                    packets_sent = stats.packets_sent,
                    bytes_sent = stats.bytes_sent,
                    send_failure_rate = stats.send_failure_rate(),
                    datagrams_dropped = stats.datagrams_dropped,
                    "Aggregator totals"
                );
            }
            RoleState::Collector(collector) => collector.stop(),
            RoleState::Source(apps) => {
                for app in apps.iter_mut() {
                    app.stop();
                    let stats = app.stats();
                    info!(
                        application = app.application(),
                        messages_sent = stats.messages_sent,
                        bytes_sent = stats.bytes_sent,
                        send_failures = stats.send_failures,
                        "Application totals"
                    );
                }
            }
        }

        self.shutdown_transports().await;

        // Drop packet channel
        self.packet_rx.take();

        self.state = NodeState::Stopped;
        info!(state = %self.state, "Node stopped");
        Ok(())
    }

    /// Stop and release every bound transport.
    async fn shutdown_transports(&mut self) {
        for mut transport in self.transports.drain(..) {
            let transport_id = transport.transport_id();
            match transport.stop_async().await {
                Ok(()) => {
                    debug!(transport_id = %transport_id, name = transport.name(), "Transport stopped");
                }
                Err(e) => {
                    warn!(
                        transport_id = %transport_id,
                        name = transport.name(),
                        error = %e,
                        "Transport stop failed"
                    );
                }
            }
        }
    }
}
