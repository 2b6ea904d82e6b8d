//! DATP Collector
//!
//! Root of the aggregation tree. Unpacks every datagram it receives and
//! accounts how many original messages and bytes arrived, how many of
//! them were merged on the way, and how long they took end to end.

use crate::protocol::{uniform_counter, MessageIter, ProtocolError};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the collector receive path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollectorError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("collector not running")]
    NotRunning,
}

/// Collector counters and derived aggregation metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub messages_received: u64,
    /// Original messages folded into others before arrival.
    pub messages_merged: u64,
    /// Bytes those merged messages would have taken on their own.
    pub bytes_merged: u64,
    pub probes_received: u64,
    pub datagrams_dropped: u64,
    /// End-to-end delay summed over original messages.
    pub message_delay: Duration,
}

impl CollectorStats {
    /// Messages that shared a datagram with an earlier message.
    pub fn messages_concatenated(&self) -> u64 {
        self.messages_received.saturating_sub(self.packets_received)
    }

    /// Original messages generated upstream.
    pub fn messages_total(&self) -> u64 {
        self.messages_received + self.messages_merged
    }

    /// Bytes that would have arrived without merging.
    pub fn bytes_total(&self) -> u64 {
        self.bytes_merged + self.bytes_received
    }

    /// Percentage of original messages that did not need their own datagram.
    pub fn message_rate(&self) -> f64 {
        percent(
            self.messages_concatenated() + self.messages_merged,
            self.messages_total(),
        )
    }

    /// Percentage of bytes saved by merging.
    pub fn byte_rate(&self) -> f64 {
        percent(self.bytes_merged, self.bytes_total())
    }

    pub fn average_delay(&self) -> Duration {
        match u32::try_from(self.messages_total()) {
            Ok(0) => Duration::ZERO,
            Ok(total) => self.message_delay / total,
            Err(_) => Duration::from_secs_f64(
                self.message_delay.as_secs_f64() / self.messages_total() as f64,
            ),
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Tree root.
#[derive(Debug, Default)]
pub struct Collector {
    running: bool,
    stats: CollectorStats,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.running = true;
        info!("Collector started");
    }

    /// Stop accounting; later datagrams and probes are ignored.
    pub fn stop(&mut self) {
        if self.running {
            info!(
                messages_total = self.stats.messages_total(),
                message_rate = self.stats.message_rate(),
                byte_rate = self.stats.byte_rate(),
                average_delay_us = self.stats.average_delay().as_micros() as u64,
                "Collector stopped"
            );
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> CollectorStats {
        self.stats
    }

    /// Account one aggregated datagram received at `now`.
    ///
    /// Messages before an integrity violation are kept in the counters;
    /// the rest of the datagram is dropped.
    pub fn receive_datagram(&mut self, data: &[u8], now: Duration) -> Result<(), CollectorError> {
        if !self.running {
            return Err(CollectorError::NotRunning);
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;

        for framed in MessageIter::new(data) {
            let result = framed.and_then(|framed| {
                uniform_counter(framed.payload).map(|counter| (framed, counter.unwrap_or(0)))
            });
            let (framed, counter) = match result {
                Ok(accounted) => accounted,
                Err(e) => {
                    self.stats.datagrams_dropped += 1;
                    warn!(error = %e, "Dropping rest of datagram");
                    return Err(e.into());
                }
            };
            self.stats.messages_received += 1;

            let sent_at = Duration::from_nanos(framed.header.timestamp());
            let delay = now.saturating_sub(sent_at);
            if counter > 0 {
                let extra = u64::from(counter - 1);
                let size = (framed.header.data_length() as usize + framed.header_size) as u64;
                self.stats.message_delay += delay.saturating_mul(counter);
                self.stats.messages_merged += extra;
                self.stats.bytes_merged += size * extra;
            } else {
                self.stats.message_delay += delay;
            }

            debug!(
                application = framed.header.application(),
                counter,
                delay_us = delay.as_micros() as u64,
                "Message collected"
            );
        }
        Ok(())
    }

    /// Account a route probe.
    pub fn receive_probe(&mut self, from: SocketAddr) {
        if !self.running {
            return;
        }
        self.stats.probes_received += 1;
        debug!(
            from = %from,
            probes_received = self.stats.probes_received,
            "Route probe received"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_block, DataHeader, DatpHeader, Message};

    fn message(application: u8, counter: u32, chunks: usize, sent_us: u64) -> Message {
        let mut payload = Vec::new();
        for _ in 0..chunks {
            payload.extend_from_slice(&DataHeader::new(counter).encode());
        }
        let header = DatpHeader::new()
            .with_application(application)
            .with_timestamp(sent_us * 1000)
            .with_data_length(payload.len() as u8);
        Message::new(header, payload)
    }

    fn running() -> Collector {
        let mut collector = Collector::new();
        collector.start();
        collector
    }

    fn us(v: u64) -> Duration {
        Duration::from_micros(v)
    }

    #[test]
    fn test_original_messages() {
        let mut collector = running();
        let block = encode_block([&message(1, 0, 5, 100), &message(2, 0, 5, 300)]);

        collector.receive_datagram(&block, us(1100)).unwrap();

        let stats = collector.stats();
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.bytes_received, block.len() as u64);
        assert_eq!(stats.messages_merged, 0);
        assert_eq!(stats.messages_concatenated(), 1);
        assert_eq!(stats.message_delay, us(1000) + us(800));
        assert_eq!(stats.average_delay(), us(900));
        assert_eq!(stats.message_rate(), 50.0);
    }

    #[test]
    fn test_merged_message_accounting() {
        let mut collector = running();
        let merged = message(1, 3, 2, 0);
        // Header: flags + application + timestamp + data length.
        assert_eq!(merged.header.header_size(), 11);

        collector.receive_datagram(&merged.encode(), us(2000)).unwrap();

        let stats = collector.stats();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.messages_merged, 2);
        assert_eq!(stats.bytes_merged, (8 + 11) * 2);
        assert_eq!(stats.messages_total(), 3);
        assert_eq!(stats.message_delay, us(6000));
        assert_eq!(stats.average_delay(), us(2000));
        assert_eq!(stats.bytes_total(), stats.bytes_received + 38);
    }

    #[test]
    fn test_non_uniform_counters_dropped() {
        let mut collector = running();
        let mut payload = DataHeader::new(2).encode().to_vec();
        payload.extend_from_slice(&DataHeader::new(3).encode());
        let bad = Message::new(
            DatpHeader::new().with_application(1).with_data_length(8),
            payload,
        );
        let block = encode_block([&message(1, 0, 1, 0), &bad, &message(2, 0, 1, 0)]);

        let result = collector.receive_datagram(&block, us(10));
        assert!(matches!(
            result,
            Err(CollectorError::Protocol(ProtocolError::NonUniformCounters { .. }))
        ));

        let stats = collector.stats();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.datagrams_dropped, 1);
    }

    #[test]
    fn test_probes_counted() {
        let mut collector = running();
        let from: SocketAddr = "10.1.1.4:40000".parse().unwrap();
        collector.receive_probe(from);
        collector.receive_probe(from);
        assert_eq!(collector.stats().probes_received, 2);
    }

    #[test]
    fn test_stop_ignores_traffic() {
        let mut collector = running();
        collector.stop();

        let result = collector.receive_datagram(&message(1, 0, 1, 0).encode(), us(5));
        assert_eq!(result, Err(CollectorError::NotRunning));
        collector.receive_probe("10.1.1.4:40000".parse().unwrap());
        assert_eq!(collector.stats(), CollectorStats::default());
    }

    #[test]
    fn test_rates_without_traffic() {
        let stats = CollectorStats::default();
        assert_eq!(stats.message_rate(), 0.0);
        assert_eq!(stats.byte_rate(), 0.0);
        assert_eq!(stats.average_delay(), Duration::ZERO);
    }
}
