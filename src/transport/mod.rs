//! Transport Layer Abstractions
//!
//! Datagram delivery underneath DATP. Protocol components never own a
//! socket: they are handed a `DatagramSender` for each call that may
//! transmit, and the node feeds them datagrams read off a packet channel.

pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use udp::UdpTransport;

/// Current time as a duration since the UNIX epoch.
///
/// This is the time base the node runtime hands to every component.
pub fn unix_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

// ============================================================================
// Packet Channel Types
// ============================================================================

/// A datagram received from a transport.
#[derive(Clone, Debug)]
pub struct ReceivedDatagram {
    /// Which transport received this datagram.
    pub transport_id: TransportId,
    /// Sender address.
    pub remote_addr: SocketAddr,
    /// Datagram payload.
    pub data: Vec<u8>,
    /// Receipt time since the UNIX epoch.
    pub timestamp: Duration,
}

impl ReceivedDatagram {
    /// Create a received datagram stamped with the current time.
    pub fn new(transport_id: TransportId, remote_addr: SocketAddr, data: Vec<u8>) -> Self {
        Self::with_timestamp(transport_id, remote_addr, data, unix_time())
    }

    pub fn with_timestamp(
        transport_id: TransportId,
        remote_addr: SocketAddr,
        data: Vec<u8>,
        timestamp: Duration,
    ) -> Self {
        Self {
            transport_id,
            remote_addr,
            data,
            timestamp,
        }
    }
}

/// Channel sender for received datagrams.
pub type PacketTx = tokio::sync::mpsc::Sender<ReceivedDatagram>;

/// Channel receiver for received datagrams.
pub type PacketRx = tokio::sync::mpsc::Receiver<ReceivedDatagram>;

/// Create a packet channel with the given buffer size.
pub fn packet_channel(buffer: usize) -> (PacketTx, PacketRx) {
    tokio::sync::mpsc::channel(buffer)
}

// ============================================================================
// Transport Identifiers
// ============================================================================

/// Identifies one bound endpoint of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportId(u32);

impl TransportId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport:{}", self.0)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors related to transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not started")]
    NotStarted,

    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport failed to start: {0}")]
    StartFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Transport State
// ============================================================================

/// Transport lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    /// Configured but not started.
    Configured,
    /// Bound and receiving.
    Up,
    /// Was up, now stopped.
    Down,
    /// Failed to start.
    Failed,
}

impl TransportState {
    /// Check if the transport is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, TransportState::Up)
    }

    /// Check if the transport can be started.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            TransportState::Configured | TransportState::Down | TransportState::Failed
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Configured => "configured",
            TransportState::Up => "up",
            TransportState::Down => "down",
            TransportState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Datagram Sender
// ============================================================================

/// Connectionless, non-blocking datagram transmission.
///
/// Implementations must not block: a datagram that cannot be handed to the
/// network right away is reported as an error and is not retried.
pub trait DatagramSender {
    /// Send `data` as one datagram to `to`, returning the bytes written.
    fn send_to(&mut self, data: &[u8], to: SocketAddr) -> Result<usize, TransportError>;
}

// ============================================================================
// Tests
// ============================================================================
