//! Message Scheduler
//!
//! The scheduler buffers messages received by an aggregator, answers merge
//! queries about them, and decides when buffered messages leave the node.
//! Everything that leaves in the same sweep is concatenated into a single
//! outbound block.

mod simple;

pub use simple::{SimpleScheduler, DEFAULT_MAXIMUM_HOLD, DEFAULT_MINIMUM_HOLD};

use crate::protocol::{DatpHeader, Message, MessageId};
use std::time::Duration;
use thiserror::Error;

/// Bookkeeping violations inside a scheduler.
///
/// These indicate a bug in how messages were handed to the scheduler, not
/// bad input from the network.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("message has no internal identifier")]
    InvalidMessageId,

    #[error("message {0} is already buffered")]
    DuplicateMessageId(MessageId),

    #[error("message {0} is not buffered")]
    UnknownMessageId(MessageId),

    #[error("timer sweep ejected no messages")]
    NothingEjected,

    #[error("invalid hold times: minimum {minimum:?} must be non-zero and at most maximum {maximum:?}")]
    InvalidHoldTimes { maximum: Duration, minimum: Duration },
}

/// Scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ejections that joined an earlier ejection of the same sweep.
    pub messages_concatenated: u64,
    /// Original messages ejected, merged ones weighted by their counter.
    pub messages_total: u64,
    /// Accumulated buffering delay, weighted like `messages_total`.
    pub scheduler_delay: Duration,
    /// Messages currently buffered.
    pub messages_buffered: usize,
}

impl SchedulerStats {
    /// Mean time an original message spent in the buffer.
    pub fn average_delay(&self) -> Duration {
        if self.messages_total == 0 {
            Duration::ZERO
        } else {
            self.scheduler_delay
                .checked_div(u32::try_from(self.messages_total).unwrap_or(u32::MAX))
                .unwrap_or(Duration::ZERO)
        }
    }
}

/// Buffering and ejection policy.
///
/// All methods run on the node's single event thread. Timer deadlines are
/// expressed in the caller's time base; the owner calls
/// `message_timer_expired` at (or for) each deadline reported by
/// `next_deadline`.
pub trait Scheduler {
    /// Find a buffered message of the same application as `header`.
    ///
    /// Returns `None` when nothing of that application is pending.
    fn receive_query(&self, header: &DatpHeader) -> Option<Message>;

    /// Buffer a message that has no merge partner and arm its timer.
    fn receive_new_message(&mut self, message: Message, now: Duration)
        -> Result<(), SchedulerError>;

    /// Replace a buffered message in place after a merge. The timer is
    /// left untouched.
    fn receive_existing_message(&mut self, message: Message) -> Result<(), SchedulerError>;

    /// Earliest armed timer.
    fn next_deadline(&self) -> Option<Duration>;

    /// Run one ejection sweep at `now` and return the outbound block.
    fn message_timer_expired(&mut self, now: Duration) -> Result<Vec<u8>, SchedulerError>;

    /// Cancel every timer and drop every buffered message.
    fn clear(&mut self);

    fn stats(&self) -> SchedulerStats;
}
