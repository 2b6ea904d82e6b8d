//! RX event loop and datagram dispatch.

use super::{Node, NodeError, RoleState, PROBE_TRANSPORT};
use crate::transport::{unix_time, ReceivedDatagram};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Wait between wakeups when the role has no pending timer.
const IDLE_WAIT: Duration = Duration::from_secs(1);

impl Node {
    // === RX Event Loop ===

    /// Run the receive event loop until `shutdown` resolves.
    ///
    /// Datagrams from every transport are dispatched to the hosted role;
    /// between datagrams the loop sleeps until the role's next timer and
    /// fires every timer due by then. The loop also ends when the packet
    /// channel closes.
    pub async fn run_rx_loop<F>(&mut self, shutdown: F) -> Result<(), NodeError>
    where
        F: Future<Output = ()>,
    {
        let mut packet_rx = self.packet_rx.take().ok_or(NodeError::NotStarted)?;
        tokio::pin!(shutdown);

        info!(role = %self.role(), "RX event loop started");

        loop {
            let wait = self
                .role
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(unix_time()))
                .unwrap_or(IDLE_WAIT);

            tokio::select! {
                packet = packet_rx.recv() => {
                    match packet {
                        Some(datagram) => self.process_datagram(datagram),
                        None => {
                            info!("RX event loop stopped (channel closed)");
                            return Ok(());
                        }
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    self.fire_timers(unix_time());
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }

        self.packet_rx = Some(packet_rx);
        info!("RX event loop stopped");
        Ok(())
    }

    /// Fire every role timer due at `now`, sending on the data transport.
    pub(super) fn fire_timers(&mut self, now: Duration) {
        let Self {
            role, transports, ..
        } = self;
        if let Some(sender) = transports.first_mut() {
            role.poll(now, sender);
        }
    }

    /// Dispatch one received datagram to the hosted role.
    ///
    /// Timers due before the datagram arrived fire first so that events
    /// are handled in time order.
    pub(super) fn process_datagram(&mut self, datagram: ReceivedDatagram) {
        let now = datagram.timestamp;
        self.fire_timers(now);

        let Self {
            role, transports, ..
        } = self;
        match role {
            RoleState::Aggregator(aggregator) => {
                let Some(sender) = transports.first_mut() else {
                    return;
                };
                if let Err(e) = aggregator.receive_datagram(&datagram.data, now, sender) {
                    debug!(
                        remote_addr = %datagram.remote_addr,
                        error = %e,
                        "Datagram not processed"
                    );
                }
            }
            RoleState::Collector(collector) => {
                if datagram.transport_id == PROBE_TRANSPORT {
                    collector.receive_probe(datagram.remote_addr);
                } else if let Err(e) = collector.receive_datagram(&datagram.data, now) {
                    debug!(
                        remote_addr = %datagram.remote_addr,
                        error = %e,
                        "Datagram not collected"
                    );
                }
            }
            RoleState::Source(_) => {
                debug!(
                    transport_id = %datagram.transport_id,
                    remote_addr = %datagram.remote_addr,
                    bytes = datagram.data.len(),
                    "Source node received a datagram, dropping"
                );
            }
        }
    }
}
