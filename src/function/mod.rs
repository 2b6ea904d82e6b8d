//! Merge Function
//!
//! A function sits between the receive path and the scheduler. For each
//! new message it asks the scheduler for a pending message of the same
//! application and either merges the two or hands the new message over for
//! buffering.

mod simple;

pub use simple::{merge_counters, weighted_average, SimpleFunction};

use crate::protocol::{Message, MessageId, ProtocolError};
use crate::scheduler::{Scheduler, SchedulerError};
use std::time::Duration;
use thiserror::Error;

/// Errors from a merge attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FunctionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// What happened to a message handed to the function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged into the buffered message with this id.
    Merged(MessageId),
    /// No partner was pending; the message is now buffered on its own.
    Buffered(MessageId),
}

/// Merge counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FunctionStats {
    pub messages_merged: u64,
    pub bytes_merged: u64,
}

/// Merge policy.
pub trait Function {
    /// Record the scheduler's answer to a query. `None` means nothing of
    /// that application is pending.
    fn receive_query_response(&mut self, existing: Option<Message>);

    /// Merge `message` into a pending partner or buffer it.
    ///
    /// The query to `scheduler` completes before any merge decision is
    /// made. `now` arms the timer of a newly buffered message.
    fn receive_new_message(
        &mut self,
        message: Message,
        scheduler: &mut dyn Scheduler,
        now: Duration,
    ) -> Result<MergeOutcome, FunctionError>;

    fn stats(&self) -> FunctionStats;
}
