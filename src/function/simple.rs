//! Counter-based merge of same-application messages.

use super::{Function, FunctionError, FunctionStats, MergeOutcome};
use crate::protocol::{uniform_counter, DataHeader, DatpHeader, Message, ProtocolError};
use crate::scheduler::Scheduler;
use std::time::Duration;
use tracing::{debug, trace};

/// Combine two chunk counters.
///
/// Returns the output counter and the `(ca, cb)` weights of the new and
/// existing message. A counter of zero stands for one original message.
pub fn merge_counters(a: u32, b: u32) -> (u32, (u32, u32)) {
    match (a, b) {
        (0, 0) => (2, (1, 1)),
        (0, b) => (b.saturating_add(1), (1, b)),
        (a, 0) => (a.saturating_add(1), (a, 1)),
        (a, b) => (a.saturating_add(b), (a, b)),
    }
}

/// `(new * ca + existing * cb) / (ca + cb)` with integer division.
pub fn weighted_average(new: u128, existing: u128, weights: (u32, u32)) -> u128 {
    let (ca, cb) = (u128::from(weights.0), u128::from(weights.1));
    let total = ca + cb;
    if total == 0 {
        return existing;
    }
    (new * ca + existing * cb) / total
}

fn average_duration(new: Duration, existing: Duration, weights: (u32, u32)) -> Duration {
    let nanos = weighted_average(new.as_nanos(), existing.as_nanos(), weights);
    let secs = (nanos / 1_000_000_000) as u64;
    let subsec = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, subsec)
}

/// Merge function holding at most one query response at a time.
#[derive(Debug, Default)]
pub struct SimpleFunction {
    existing: Option<Message>,
    stats: FunctionStats,
}

impl SimpleFunction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `new` into `existing`.
    ///
    /// The merged message keeps the existing message's header and id, with
    /// timestamp and receive time replaced by their weighted averages.
    fn merge(&mut self, new: &Message, existing: &Message) -> Result<Message, ProtocolError> {
        if new.payload.len() != existing.payload.len() {
            return Err(ProtocolError::UnevenMergePayloads {
                new_len: new.payload.len(),
                existing_len: existing.payload.len(),
            });
        }
        uniform_counter(&new.payload)?;
        uniform_counter(&existing.payload)?;

        let mut payload = Vec::with_capacity(new.payload.len());
        let mut weights = (1, 1);
        let chunks = new
            .payload
            .chunks_exact(DataHeader::SIZE)
            .zip(existing.payload.chunks_exact(DataHeader::SIZE));
        for (new_chunk, existing_chunk) in chunks {
            let a = DataHeader::decode(new_chunk)?.value();
            let b = DataHeader::decode(existing_chunk)?.value();
            let (counter, pair) = merge_counters(a, b);
            payload.extend_from_slice(&DataHeader::new(counter).encode());
            weights = pair;
            self.stats.bytes_merged += DataHeader::SIZE as u64;
        }

        let mut header: DatpHeader = existing.header.clone();
        let timestamp = weighted_average(
            u128::from(new.header.timestamp()),
            u128::from(existing.header.timestamp()),
            weights,
        );
        header.set_timestamp(timestamp as u64);
        header.set_receive_time(average_duration(
            new.header.receive_time(),
            existing.header.receive_time(),
            weights,
        ));

        self.stats.bytes_merged += new.header.header_size() as u64;
        self.stats.messages_merged += 1;

        Ok(Message::new(header, payload))
    }
}

impl Function for SimpleFunction {
    fn receive_query_response(&mut self, existing: Option<Message>) {
        trace!(found = existing.is_some(), "Query response");
        self.existing = existing;
    }

    fn receive_new_message(
        &mut self,
        message: Message,
        scheduler: &mut dyn Scheduler,
        now: Duration,
    ) -> Result<MergeOutcome, FunctionError> {
        let response = scheduler.receive_query(&message.header);
        self.receive_query_response(response);

        // Two empty payloads carry no counters to merge.
        let existing = self
            .existing
            .take()
            .filter(|existing| !(existing.payload.is_empty() && message.payload.is_empty()));

        match existing {
            Some(existing) => {
                let merged = self.merge(&message, &existing)?;
                let id = merged.header.message_id();
                debug!(
                    message_id = %id,
                    merged_from = %message.header.message_id(),
                    application = message.header.application(),
                    "Messages merged"
                );
                scheduler.receive_existing_message(merged)?;
                Ok(MergeOutcome::Merged(id))
            }
            None => {
                let id = message.header.message_id();
                scheduler.receive_new_message(message, now)?;
                Ok(MergeOutcome::Buffered(id))
            }
        }
    }

    fn stats(&self) -> FunctionStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageId, MessageIter};
    use crate::scheduler::SimpleScheduler;

    fn us(v: u64) -> Duration {
        Duration::from_micros(v)
    }

    fn make_message(id: u32, application: u8, counters: &[u32], timestamp: u64) -> Message {
        let mut payload = Vec::new();
        for counter in counters {
            payload.extend_from_slice(&DataHeader::new(*counter).encode());
        }
        let mut header = DatpHeader::new()
            .with_application(application)
            .with_timestamp(timestamp)
            .with_data_length(payload.len() as u8);
        header.set_message_id(MessageId::new(id));
        header.set_receive_time(Duration::from_nanos(timestamp));
        Message::new(header, payload)
    }

    fn make_scheduler() -> SimpleScheduler {
        SimpleScheduler::new(us(1000), us(500)).unwrap()
    }

    // ===== Arithmetic Tests =====

    #[test]
    fn test_merge_two_originals() {
        assert_eq!(merge_counters(0, 0), (2, (1, 1)));
    }

    #[test]
    fn test_merge_original_into_merged() {
        assert_eq!(merge_counters(0, 5), (6, (1, 5)));
    }

    #[test]
    fn test_merge_merged_into_original() {
        assert_eq!(merge_counters(3, 0), (4, (3, 1)));
    }

    #[test]
    fn test_merge_two_merged() {
        assert_eq!(merge_counters(3, 4), (7, (3, 4)));
    }

    #[test]
    fn test_weighted_timestamp() {
        assert_eq!(weighted_average(1000, 2000, (1, 1)), 1500);
        assert_eq!(weighted_average(1000, 2000, (1, 3)), 1750);
        // Integer division truncates.
        assert_eq!(weighted_average(1, 2, (1, 1)), 1);
    }

    #[test]
    fn test_weighted_average_large_values() {
        let t = u128::from(u64::MAX);
        assert_eq!(weighted_average(t, t, (u32::MAX, u32::MAX)), t);
    }

    // ===== Merge Tests =====

    #[test]
    fn test_new_message_is_buffered() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        let outcome = function
            .receive_new_message(make_message(1, 1, &[0], 1000), &mut scheduler, us(1))
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Buffered(MessageId::new(1)));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(function.stats(), FunctionStats::default());
    }

    #[test]
    fn test_same_application_merges() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        function
            .receive_new_message(make_message(1, 1, &[0, 0], 2000), &mut scheduler, us(2))
            .unwrap();
        let outcome = function
            .receive_new_message(make_message(2, 1, &[0, 0], 1000), &mut scheduler, us(3))
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Merged(MessageId::new(1)));
        assert_eq!(scheduler.len(), 1);
        assert!(!scheduler.is_buffered(MessageId::new(2)));

        let stored = scheduler.message(MessageId::new(1)).unwrap();
        assert_eq!(stored.header.timestamp(), 1500);
        assert_eq!(stored.header.receive_time(), Duration::from_nanos(1500));
        assert_eq!(stored.payload, [0, 0, 0, 2, 0, 0, 0, 2]);

        let stats = function.stats();
        assert_eq!(stats.messages_merged, 1);
        // Two chunks plus the new header (1 + 1 + 8 + 1).
        assert_eq!(stats.bytes_merged, 8 + 11);
    }

    #[test]
    fn test_merge_into_merged_message() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        function
            .receive_new_message(make_message(1, 1, &[5], 6000), &mut scheduler, us(1))
            .unwrap();
        function
            .receive_new_message(make_message(2, 1, &[0], 0), &mut scheduler, us(2))
            .unwrap();

        let stored = scheduler.message(MessageId::new(1)).unwrap();
        assert_eq!(stored.payload, DataHeader::new(6).encode().to_vec());
        assert_eq!(stored.header.timestamp(), 5000);
    }

    #[test]
    fn test_merge_keeps_timer() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        function
            .receive_new_message(make_message(1, 1, &[0], 0), &mut scheduler, us(0))
            .unwrap();
        function
            .receive_new_message(make_message(2, 1, &[0], 0), &mut scheduler, us(400))
            .unwrap();

        assert_eq!(scheduler.next_deadline(), Some(us(1000)));
    }

    #[test]
    fn test_different_applications_do_not_merge() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        function
            .receive_new_message(make_message(1, 1, &[0], 0), &mut scheduler, us(0))
            .unwrap();
        let outcome = function
            .receive_new_message(make_message(2, 2, &[0], 0), &mut scheduler, us(0))
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Buffered(MessageId::new(2)));
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn test_empty_payloads_are_not_merged() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        function
            .receive_new_message(make_message(1, 1, &[], 0), &mut scheduler, us(0))
            .unwrap();
        let outcome = function
            .receive_new_message(make_message(2, 1, &[], 0), &mut scheduler, us(0))
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Buffered(MessageId::new(2)));
        assert_eq!(function.stats().messages_merged, 0);
    }

    #[test]
    fn test_uneven_payloads_rejected() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        function
            .receive_new_message(make_message(1, 1, &[0], 0), &mut scheduler, us(0))
            .unwrap();
        let result =
            function.receive_new_message(make_message(2, 1, &[0, 0], 0), &mut scheduler, us(0));

        assert_eq!(
            result,
            Err(FunctionError::Protocol(ProtocolError::UnevenMergePayloads {
                new_len: 8,
                existing_len: 4
            }))
        );
        // The pending message is left as it was.
        let stored = scheduler.message(MessageId::new(1)).unwrap();
        assert_eq!(stored.payload, DataHeader::new(0).encode().to_vec());
    }

    #[test]
    fn test_non_uniform_counters_rejected() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        function
            .receive_new_message(make_message(1, 1, &[2, 2], 0), &mut scheduler, us(0))
            .unwrap();
        let result =
            function.receive_new_message(make_message(2, 1, &[0, 3], 0), &mut scheduler, us(0));

        assert!(matches!(
            result,
            Err(FunctionError::Protocol(ProtocolError::NonUniformCounters { .. }))
        ));
    }

    #[test]
    fn test_merged_block_is_one_message() {
        let mut scheduler = make_scheduler();
        let mut function = SimpleFunction::new();

        function
            .receive_new_message(make_message(1, 1, &[0], 0), &mut scheduler, us(0))
            .unwrap();
        function
            .receive_new_message(make_message(2, 1, &[0], 0), &mut scheduler, us(100))
            .unwrap();

        let block = scheduler.message_timer_expired(us(1000)).unwrap();
        let messages: Vec<_> = MessageIter::new(&block).collect();
        assert_eq!(messages.len(), 1);
        let message = messages.into_iter().next().unwrap().unwrap();
        assert_eq!(message.payload, DataHeader::new(2).encode());
    }
}
