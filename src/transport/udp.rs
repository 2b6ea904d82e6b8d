//! UDP Transport Implementation
//!
//! One bound UDP socket per transport. A spawned task reads datagrams and
//! forwards them to the node over the packet channel; sends are
//! non-blocking and go straight to the socket.

use super::{
    DatagramSender, PacketTx, ReceivedDatagram, TransportError, TransportId, TransportState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest datagram the receive loop accepts.
const RECV_BUFFER_SIZE: usize = 65_535;

/// UDP transport for one DATP port.
pub struct UdpTransport {
    transport_id: TransportId,
    /// Role of the endpoint, for logs ("aggregator", "probe", ...).
    name: &'static str,
    bind_addr: SocketAddr,
    state: TransportState,
    socket: Option<Arc<UdpSocket>>,
    packet_tx: PacketTx,
    recv_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl UdpTransport {
    pub fn new(
        transport_id: TransportId,
        name: &'static str,
        bind_addr: SocketAddr,
        packet_tx: PacketTx,
    ) -> Self {
        Self {
            transport_id,
            name,
            bind_addr,
            state: TransportState::Configured,
            socket: None,
            packet_tx,
            recv_task: None,
            local_addr: None,
        }
    }

    pub fn transport_id(&self) -> TransportId {
        self.transport_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Local bound address (only valid after start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the socket and spawn the receive loop.
    pub async fn start_async(&mut self) -> Result<(), TransportError> {
        if !self.state.can_start() {
            return Err(TransportError::AlreadyStarted);
        }

        let socket = match UdpSocket::bind(self.bind_addr).await {
            Ok(socket) => socket,
            Err(e) => {
                self.state = TransportState::Failed;
                return Err(TransportError::StartFailed(format!(
                    "bind {} failed: {}",
                    self.bind_addr, e
                )));
            }
        };
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::StartFailed(format!("get local addr: {}", e)))?;

        // Non-blocking sends need write readiness registered first.
        socket
            .writable()
            .await
            .map_err(|e| TransportError::StartFailed(format!("socket not writable: {}", e)))?;

        let socket = Arc::new(socket);
        self.socket = Some(socket.clone());
        self.local_addr = Some(local_addr);

        let transport_id = self.transport_id;
        let packet_tx = self.packet_tx.clone();
        self.recv_task = Some(tokio::spawn(async move {
            udp_receive_loop(socket, transport_id, packet_tx).await;
        }));
        self.state = TransportState::Up;

        info!(
            name = self.name,
            transport_id = %self.transport_id,
            local_addr = %local_addr,
            "UDP transport started"
        );
        Ok(())
    }

    /// Abort the receive loop and close the socket.
    pub async fn stop_async(&mut self) -> Result<(), TransportError> {
        if !self.state.is_operational() {
            return Err(TransportError::NotStarted);
        }

        if let Some(task) = self.recv_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.socket.take();
        self.local_addr = None;
        self.state = TransportState::Down;

        debug!(
            name = self.name,
            transport_id = %self.transport_id,
            "UDP transport stopped"
        );
        Ok(())
    }

    /// Send a datagram, waiting for socket readiness.
    pub async fn send_async(&self, data: &[u8], to: SocketAddr) -> Result<usize, TransportError> {
        let socket = self.operational_socket()?;
        let sent = socket
            .send_to(data, to)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(sent)
    }

    fn operational_socket(&self) -> Result<&Arc<UdpSocket>, TransportError> {
        if !self.state.is_operational() {
            return Err(TransportError::NotStarted);
        }
        self.socket.as_ref().ok_or(TransportError::NotStarted)
    }
}

impl DatagramSender for UdpTransport {
    fn send_to(&mut self, data: &[u8], to: SocketAddr) -> Result<usize, TransportError> {
        let socket = self.operational_socket()?;
        let sent = socket
            .try_send_to(data, to)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if sent != data.len() {
            return Err(TransportError::ShortSend {
                sent,
                len: data.len(),
            });
        }

        debug!(
            name = self.name,
            remote_addr = %to,
            bytes = sent,
            "UDP datagram sent"
        );
        Ok(sent)
    }
}

/// UDP receive loop - runs as a spawned task.
async fn udp_receive_loop(socket: Arc<UdpSocket>, transport_id: TransportId, packet_tx: PacketTx) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    debug!(transport_id = %transport_id, "UDP receive loop starting");

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, remote_addr)) => {
                let datagram = ReceivedDatagram::new(transport_id, remote_addr, buf[..len].to_vec());

                debug!(
                    transport_id = %transport_id,
                    remote_addr = %remote_addr,
                    bytes = len,
                    "UDP datagram received"
                );

                if packet_tx.send(datagram).await.is_err() {
                    info!(
                        transport_id = %transport_id,
                        "Packet channel closed, stopping receive loop"
                    );
                    break;
                }
            }
            Err(e) => {
                // Transient errors (ICMP unreachable and the like) are expected.
                warn!(
                    transport_id = %transport_id,
                    error = %e,
                    "UDP receive error"
                );
            }
        }
    }

    debug!(transport_id = %transport_id, "UDP receive loop stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::packet_channel;
    use tokio::time::{timeout, Duration};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (tx, _rx) = packet_channel(100);
        let mut transport = UdpTransport::new(TransportId::new(1), "aggregator", loopback(), tx);

        assert_eq!(transport.state(), TransportState::Configured);

        transport.start_async().await.unwrap();
        assert_eq!(transport.state(), TransportState::Up);
        assert!(transport.local_addr().is_some());

        transport.stop_async().await.unwrap();
        assert_eq!(transport.state(), TransportState::Down);
        assert!(transport.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let (tx, _rx) = packet_channel(100);
        let mut transport = UdpTransport::new(TransportId::new(1), "aggregator", loopback(), tx);

        transport.start_async().await.unwrap();
        let result = transport.start_async().await;
        assert!(matches!(result, Err(TransportError::AlreadyStarted)));

        transport.stop_async().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_not_started_fails() {
        let (tx, _rx) = packet_channel(100);
        let mut transport = UdpTransport::new(TransportId::new(1), "aggregator", loopback(), tx);

        let result = transport.stop_async().await;
        assert!(matches!(result, Err(TransportError::NotStarted)));
    }

    #[tokio::test]
    async fn test_send_not_started() {
        let (tx, _rx) = packet_channel(100);
        let mut transport = UdpTransport::new(TransportId::new(1), "aggregator", loopback(), tx);

        let to: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let result = transport.send_to(b"test", to);
        assert!(matches!(result, Err(TransportError::NotStarted)));
    }

    #[tokio::test]
    async fn test_send_recv() {
        let (tx1, _rx1) = packet_channel(100);
        let (tx2, mut rx2) = packet_channel(100);

        let mut t1 = UdpTransport::new(TransportId::new(1), "source", loopback(), tx1);
        let mut t2 = UdpTransport::new(TransportId::new(2), "aggregator", loopback(), tx2);

        t1.start_async().await.unwrap();
        t2.start_async().await.unwrap();

        let addr1 = t1.local_addr().unwrap();
        let addr2 = t2.local_addr().unwrap();

        let data = [0x24u8, 1, 4, 0, 0, 0, 0];
        let sent = t1.send_to(&data, addr2).unwrap();
        assert_eq!(sent, data.len());

        let datagram = timeout(Duration::from_secs(1), rx2.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        assert_eq!(datagram.data, data);
        assert_eq!(datagram.remote_addr, addr1);
        assert_eq!(datagram.transport_id, TransportId::new(2));

        t1.stop_async().await.unwrap();
        t2.stop_async().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_async() {
        let (tx1, _rx1) = packet_channel(100);
        let (tx2, mut rx2) = packet_channel(100);

        let mut t1 = UdpTransport::new(TransportId::new(1), "source", loopback(), tx1);
        let mut t2 = UdpTransport::new(TransportId::new(2), "probe", loopback(), tx2);
        t1.start_async().await.unwrap();
        t2.start_async().await.unwrap();

        let to = t2.local_addr().unwrap();
        t1.send_async(&[0u8; 12], to).await.unwrap();

        let datagram = timeout(Duration::from_secs(1), rx2.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert_eq!(datagram.data.len(), 12);

        t1.stop_async().await.unwrap();
        t2.stop_async().await.unwrap();
    }
}
