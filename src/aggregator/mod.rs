//! DATP Aggregator
//!
//! Per-node pipeline: datagrams arriving on the aggregator port are split
//! into messages, optionally merged and buffered, and forwarded to the
//! parent reported by the tree controller.
//!
//! ## Wiring
//!
//! ```text
//! full:          receive -> [function <-> scheduler] -> sweep -> send(parent)
//! pass-through:  receive -> re-frame ---------------------------> send(parent)
//! ```
//!
//! The wiring is fixed when the aggregator is built.

use crate::config::{AggregatorConfig, ConfigError, SchedulerConfig};
use crate::function::{Function, FunctionError, FunctionStats, SimpleFunction};
use crate::protocol::{MessageId, MessageIter, ProtocolError};
use crate::scheduler::{Scheduler, SchedulerError, SchedulerStats, SimpleScheduler};
use crate::transport::DatagramSender;
use crate::tree::{TreeController, TreeEvent, TreeStats};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors from the aggregator pipeline.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("aggregator not running")]
    NotRunning,

    #[error("aggregator already started")]
    AlreadyStarted,
}

impl From<FunctionError> for AggregatorError {
    fn from(err: FunctionError) -> Self {
        match err {
            FunctionError::Protocol(e) => AggregatorError::Protocol(e),
            FunctionError::Scheduler(e) => AggregatorError::Scheduler(e),
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// How received messages flow through the node.
pub enum Pipeline {
    /// Buffer every message in the scheduler, merging first when a
    /// function is installed.
    Full {
        scheduler: Box<dyn Scheduler>,
        function: Option<Box<dyn Function>>,
    },
    /// Re-frame and forward each datagram immediately.
    PassThrough,
}

impl Pipeline {
    /// Build the pipeline selected by the on/off switches.
    ///
    /// A function without a scheduler has nothing to merge against and is
    /// rejected.
    pub fn from_config(
        aggregator: &AggregatorConfig,
        scheduler: &SchedulerConfig,
    ) -> Result<Self, AggregatorError> {
        match (aggregator.scheduler_on, aggregator.function_on) {
            (false, true) => Err(ConfigError::FunctionWithoutScheduler.into()),
            (false, false) => Ok(Pipeline::PassThrough),
            (true, function_on) => {
                let simple =
                    SimpleScheduler::new(scheduler.maximum_hold(), scheduler.minimum_hold())?;
                let function: Option<Box<dyn Function>> = if function_on {
                    Some(Box::new(SimpleFunction::new()))
                } else {
                    None
                };
                Ok(Pipeline::Full {
                    scheduler: Box::new(simple),
                    function,
                })
            }
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Pipeline::PassThrough)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipeline::Full { function, .. } => f
                .debug_struct("Full")
                .field("function", &function.is_some())
                .finish(),
            Pipeline::PassThrough => write!(f, "PassThrough"),
        }
    }
}

// ============================================================================
// State and Counters
// ============================================================================

/// Aggregator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregatorState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregatorState::Created => "created",
            AggregatorState::Running => "running",
            AggregatorState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Aggregator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_sent_failure: u64,
    pub packets_received: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    /// Datagrams abandoned on a protocol integrity violation.
    pub datagrams_dropped: u64,
}

impl AggregatorStats {
    /// Failed sends as a percentage of attempted sends.
    pub fn send_failure_rate(&self) -> f64 {
        let attempts = self.packets_sent + self.packets_sent_failure;
        if attempts == 0 {
            0.0
        } else {
            self.packets_sent_failure as f64 * 100.0 / attempts as f64
        }
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// One aggregator node's protocol state.
pub struct Aggregator {
    port: u16,
    pipeline: Pipeline,
    tree: Box<dyn TreeController>,
    state: AggregatorState,
    next_message_id: u32,
    stats: AggregatorStats,
}

impl Aggregator {
    pub fn new(port: u16, pipeline: Pipeline, tree: Box<dyn TreeController>) -> Self {
        Self {
            port,
            pipeline,
            tree,
            state: AggregatorState::Created,
            next_message_id: 0,
            stats: AggregatorStats::default(),
        }
    }

    /// Build an aggregator from its configuration sections.
    pub fn from_config(
        aggregator: &AggregatorConfig,
        scheduler: &SchedulerConfig,
        tree: Box<dyn TreeController>,
    ) -> Result<Self, AggregatorError> {
        let pipeline = Pipeline::from_config(aggregator, scheduler)?;
        Ok(Self::new(aggregator.port, pipeline, tree))
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn parent(&self) -> Option<Ipv4Addr> {
        self.tree.parent()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    pub fn scheduler_stats(&self) -> Option<SchedulerStats> {
        match &self.pipeline {
            Pipeline::Full { scheduler, .. } => Some(scheduler.stats()),
            Pipeline::PassThrough => None,
        }
    }

    pub fn function_stats(&self) -> Option<FunctionStats> {
        match &self.pipeline {
            Pipeline::Full {
                function: Some(function),
                ..
            } => Some(function.stats()),
            _ => None,
        }
    }

    pub fn tree_stats(&self) -> TreeStats {
        self.tree.stats()
    }

    /// Start receiving and probing.
    pub fn start(&mut self, now: Duration) -> Result<(), AggregatorError> {
        if self.state == AggregatorState::Running {
            return Err(AggregatorError::AlreadyStarted);
        }
        self.tree.start(now);
        self.state = AggregatorState::Running;
        info!(port = self.port, pipeline = ?self.pipeline, "Aggregator started");
        Ok(())
    }

    /// Cancel every timer and stop accepting datagrams.
    ///
    /// Buffered messages are dropped.
    pub fn stop(&mut self) {
        self.tree.stop();
        if let Pipeline::Full { scheduler, .. } = &mut self.pipeline {
            scheduler.clear();
        }
        if self.state == AggregatorState::Running {
            info!(port = self.port, "Aggregator stopped");
        }
        self.state = AggregatorState::Stopped;
    }

    /// Earliest pending timer of the scheduler or tree controller.
    pub fn next_deadline(&self) -> Option<Duration> {
        let scheduler = match &self.pipeline {
            Pipeline::Full { scheduler, .. } => scheduler.next_deadline(),
            Pipeline::PassThrough => None,
        };
        match (scheduler, self.tree.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Process one received datagram.
    ///
    /// Messages are handled in order. The first integrity violation drops
    /// the rest of the datagram; messages already handed to the scheduler
    /// stay buffered. In pass-through mode nothing of a bad datagram is
    /// forwarded.
    pub fn receive_datagram(
        &mut self,
        data: &[u8],
        now: Duration,
        sender: &mut dyn DatagramSender,
    ) -> Result<(), AggregatorError> {
        if self.state != AggregatorState::Running {
            return Err(AggregatorError::NotRunning);
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;

        let mut forward = Vec::with_capacity(data.len());
        for framed in MessageIter::new(data) {
            let framed = match framed {
                Ok(framed) => framed,
                Err(e) => return Err(self.drop_datagram(e.into())),
            };
            self.stats.messages_received += 1;

            match &mut self.pipeline {
                Pipeline::PassThrough => framed.to_message().encode_into(&mut forward),
                Pipeline::Full {
                    scheduler,
                    function,
                } => {
                    let mut message = framed.to_message();
                    self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
                    message.header.set_message_id(MessageId::new(self.next_message_id));
                    message.header.set_receive_time(now);

                    let result = match function {
                        Some(function) => function
                            .receive_new_message(message, scheduler.as_mut(), now)
                            .map(|_| ())
                            .map_err(AggregatorError::from),
                        None => scheduler
                            .receive_new_message(message, now)
                            .map_err(AggregatorError::from),
                    };
                    if let Err(e) = result {
                        return Err(self.drop_datagram(e));
                    }
                }
            }
        }

        if self.pipeline.is_pass_through() {
            self.send(&forward, sender);
        }
        Ok(())
    }

    /// Fire every timer due at `now`, in deadline order.
    ///
    /// Each scheduler sweep runs at its own timer's deadline and its block
    /// is sent to the parent current at that point.
    pub fn poll(&mut self, now: Duration, sender: &mut dyn DatagramSender) {
        if self.state != AggregatorState::Running {
            return;
        }

        while let Some(deadline) = self.next_deadline().filter(|deadline| *deadline <= now) {
            if self.tree.next_deadline() == Some(deadline) {
                if let Some(TreeEvent::ParentChanged { previous, parent }) =
                    self.tree.poll(deadline, sender)
                {
                    info!(
                        previous = ?previous,
                        parent = %parent,
                        "Parent aggregator changed"
                    );
                }
                continue;
            }

            let Pipeline::Full { scheduler, .. } = &mut self.pipeline else {
                break;
            };
            match scheduler.message_timer_expired(deadline) {
                Ok(block) => self.send(&block, sender),
                Err(e) => {
                    error!(error = %e, "Scheduler sweep failed");
                    break;
                }
            }
        }
    }

    /// Transmit a block to the current parent.
    fn send(&mut self, block: &[u8], sender: &mut dyn DatagramSender) {
        let Some(parent) = self.tree.parent() else {
            self.stats.packets_sent_failure += 1;
            debug!(bytes = block.len(), "No parent aggregator, block not sent");
            return;
        };

        let to = SocketAddr::V4(SocketAddrV4::new(parent, self.port));
        match sender.send_to(block, to) {
            Ok(_) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += block.len() as u64;
                debug!(parent = %to, bytes = block.len(), "Block sent");
            }
            Err(e) => {
                self.stats.packets_sent_failure += 1;
                debug!(parent = %to, error = %e, "Block send failed");
            }
        }
    }

    fn drop_datagram(&mut self, err: AggregatorError) -> AggregatorError {
        self.stats.datagrams_dropped += 1;
        match &err {
            AggregatorError::Scheduler(e) => error!(error = %e, "Scheduler rejected message"),
            e => warn!(error = %e, "Dropping rest of datagram"),
        }
        err
    }
}
