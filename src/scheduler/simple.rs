//! Two-threshold hold-time scheduler.
//!
//! Each buffered message gets a timer of `maximum_hold`. When any timer
//! fires, every message whose own timer has less than `minimum_hold` left
//! is ejected in the same sweep, so near-simultaneous expirations leave as
//! one block.

use super::{Scheduler, SchedulerError, SchedulerStats};
use crate::protocol::{leading_counter, DatpHeader, Message, MessageId};
use crate::timer::TimerQueue;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Default time a message may wait for a merge partner.
pub const DEFAULT_MAXIMUM_HOLD: Duration = Duration::from_millis(1);

/// Default remaining-time threshold under which a message joins a sweep.
pub const DEFAULT_MINIMUM_HOLD: Duration = Duration::from_micros(500);

/// Buffered header and payload of one message.
#[derive(Clone, Debug)]
struct PendingRecord {
    header: DatpHeader,
    payload: Vec<u8>,
}

/// Scheduler keyed by internal message id.
///
/// Records and timers are kept in ascending id order; a sweep ejects in
/// that order.
pub struct SimpleScheduler {
    maximum_hold: Duration,
    minimum_hold: Duration,
    records: BTreeMap<MessageId, PendingRecord>,
    timers: TimerQueue<MessageId>,
    messages_concatenated: u64,
    messages_total: u64,
    scheduler_delay: Duration,
}

impl SimpleScheduler {
    /// Create a scheduler. `minimum_hold` must be non-zero and no larger
    /// than `maximum_hold`, otherwise a fired timer could eject nothing.
    pub fn new(maximum_hold: Duration, minimum_hold: Duration) -> Result<Self, SchedulerError> {
        if minimum_hold.is_zero() || minimum_hold > maximum_hold {
            return Err(SchedulerError::InvalidHoldTimes {
                maximum: maximum_hold,
                minimum: minimum_hold,
            });
        }
        Ok(Self {
            maximum_hold,
            minimum_hold,
            records: BTreeMap::new(),
            timers: TimerQueue::new(),
            messages_concatenated: 0,
            messages_total: 0,
            scheduler_delay: Duration::ZERO,
        })
    }

    pub fn maximum_hold(&self) -> Duration {
        self.maximum_hold
    }

    pub fn minimum_hold(&self) -> Duration {
        self.minimum_hold
    }

    /// Whether a message is buffered.
    pub fn is_buffered(&self, id: MessageId) -> bool {
        self.records.contains_key(&id)
    }

    /// Whether a timer is armed for a message.
    pub fn has_timer(&self, id: MessageId) -> bool {
        self.timers.is_pending(id)
    }

    /// Currently buffered message, if any.
    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.records
            .get(&id)
            .map(|record| Message::new(record.header.clone(), record.payload.clone()))
    }

    /// Time left on a message's timer.
    pub fn delay_left(&self, id: MessageId, now: Duration) -> Option<Duration> {
        self.timers.delay_left(id, now)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Scheduler for SimpleScheduler {
    fn receive_query(&self, header: &DatpHeader) -> Option<Message> {
        let found = self
            .records
            .values()
            .find(|record| record.header.application() == header.application())
            .map(|record| Message::new(record.header.clone(), record.payload.clone()));

        trace!(
            application = header.application(),
            found = found.is_some(),
            "Scheduler query"
        );
        found
    }

    fn receive_new_message(
        &mut self,
        message: Message,
        now: Duration,
    ) -> Result<(), SchedulerError> {
        let id = message.header.message_id();
        if id.is_none() {
            return Err(SchedulerError::InvalidMessageId);
        }
        if self.records.contains_key(&id) {
            return Err(SchedulerError::DuplicateMessageId(id));
        }

        self.records.insert(
            id,
            PendingRecord {
                header: message.header,
                payload: message.payload,
            },
        );
        self.timers.schedule(id, now + self.maximum_hold);

        debug!(
            message_id = %id,
            buffered = self.records.len(),
            "Message buffered"
        );
        Ok(())
    }

    fn receive_existing_message(&mut self, message: Message) -> Result<(), SchedulerError> {
        let id = message.header.message_id();
        let record = self
            .records
            .get_mut(&id)
            .ok_or(SchedulerError::UnknownMessageId(id))?;
        record.header = message.header;
        record.payload = message.payload;

        debug!(message_id = %id, "Buffered message updated");
        Ok(())
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    fn message_timer_expired(&mut self, now: Duration) -> Result<Vec<u8>, SchedulerError> {
        let mut block = Vec::new();
        let mut ejected: Vec<MessageId> = Vec::new();

        for id in self.timers.keys_sorted() {
            let left = self.timers.delay_left(id, now).unwrap_or(Duration::ZERO);
            if left >= self.minimum_hold {
                continue;
            }

            let record = self
                .records
                .get(&id)
                .ok_or(SchedulerError::UnknownMessageId(id))?;

            record.header.encode_into(&mut block);
            block.extend_from_slice(&record.payload);

            let waited = now.saturating_sub(record.header.receive_time());
            let counter = leading_counter(&record.payload);
            if counter > 0 {
                self.scheduler_delay += waited.saturating_mul(counter);
                self.messages_total += u64::from(counter);
            } else {
                self.scheduler_delay += waited;
                self.messages_total += 1;
            }
            if !ejected.is_empty() {
                self.messages_concatenated += 1;
            }

            debug!(
                message_id = %id,
                counter,
                waited_us = waited.as_micros() as u64,
                "Message ejected"
            );
            ejected.push(id);
        }

        if ejected.is_empty() {
            return Err(SchedulerError::NothingEjected);
        }

        for id in &ejected {
            self.timers.cancel(*id);
            self.records.remove(id);
        }

        debug!(
            messages = ejected.len(),
            bytes = block.len(),
            remaining = self.records.len(),
            "Block ejected"
        );
        Ok(block)
    }

    fn clear(&mut self) {
        if !self.records.is_empty() {
            debug!(dropped = self.records.len(), "Scheduler cleared");
        }
        self.timers.clear();
        self.records.clear();
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            messages_concatenated: self.messages_concatenated,
            messages_total: self.messages_total,
            scheduler_delay: self.scheduler_delay,
            messages_buffered: self.records.len(),
        }
    }
}
