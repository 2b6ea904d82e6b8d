//! Source application: periodic message generator for leaf nodes.

use crate::config::{ApplicationConfig, ConfigError};
use crate::protocol::{DatpHeader, Message};
use crate::transport::DatagramSender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// Send counters of one application stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplicationStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
}

/// One periodic stream of unmerged messages.
///
/// Every message carries application, priority, timestamp and data length,
/// followed by `data_length` zero bytes: one zero merge counter per 4-byte
/// chunk.
pub struct SourceApplication {
    application: u8,
    priority: u8,
    data_length: u8,
    interval: Duration,
    peer: SocketAddr,
    rng: StdRng,
    next_send: Option<Duration>,
    stats: ApplicationStats,
}

impl SourceApplication {
    pub fn new(config: &ApplicationConfig) -> Result<Self, ConfigError> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: &ApplicationConfig, rng: StdRng) -> Result<Self, ConfigError> {
        let data_length =
            u8::try_from(config.data_length).map_err(|_| ConfigError::InvalidApplication {
                application: config.application,
                reason: "data_length exceeds 255 bytes".to_string(),
            })?;
        Ok(Self {
            application: config.application,
            priority: config.priority,
            data_length,
            interval: config.interval(),
            peer: config.peer_addr(),
            rng,
            next_send: None,
            stats: ApplicationStats::default(),
        })
    }

    pub fn application(&self) -> u8 {
        self.application
    }

    pub fn stats(&self) -> ApplicationStats {
        self.stats
    }

    /// Schedule the first send 1-5 ms from `now`, in 20 us steps.
    pub fn start(&mut self, now: Duration) {
        let delay = Duration::from_micros(self.rng.gen_range(0..=200u64) * 20 + 1000);
        self.next_send = Some(now + delay);
        debug!(
            application = self.application,
            start_delay_us = delay.as_micros() as u64,
            peer = %self.peer,
            "Source application started"
        );
    }

    /// Cancel the pending send.
    pub fn stop(&mut self) {
        self.next_send = None;
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.next_send
    }

    /// Message the stream emits at `now`.
    pub fn build_message(&self, now: Duration) -> Message {
        let header = DatpHeader::new()
            .with_application(self.application)
            .with_timestamp(now.as_nanos() as u64)
            .with_priority(self.priority)
            .with_data_length(self.data_length);
        Message::new(header, vec![0u8; self.data_length as usize])
    }

    /// Emit every send due at `now`, each stamped with its own deadline.
    pub fn poll(&mut self, now: Duration, sender: &mut dyn DatagramSender) {
        while let Some(deadline) = self.next_send.filter(|deadline| *deadline <= now) {
            let datagram = self.build_message(deadline).encode();
            match sender.send_to(&datagram, self.peer) {
                Ok(_) => {
                    self.stats.messages_sent += 1;
                    self.stats.bytes_sent += datagram.len() as u64;
                }
                Err(e) => {
                    self.stats.send_failures += 1;
                    debug!(application = self.application, error = %e, "Message send failed");
                }
            }
            self.next_send = Some(deadline + self.interval);
        }
    }
}
