//! DATP: Data Aggregation Transport Protocol
//!
//! Merges and batches many small application messages into fewer, larger
//! datagrams as they travel up a tree of aggregators toward a collector.

pub mod aggregator;
pub mod application;
pub mod collector;
pub mod config;
pub mod function;
pub mod node;
pub mod protocol;
pub mod routing;
pub mod scheduler;
pub mod timer;
pub mod transport;
pub mod tree;

#[cfg(test)]
mod testing;

// Re-export protocol types
pub use protocol::{
    encode_block, DataHeader, DatpHeader, FramedMessage, HeaderFlags, Message, MessageId, MessageIter,
    ProtocolError,
};

// Re-export pipeline types
pub use aggregator::{Aggregator, AggregatorError, AggregatorState, AggregatorStats, Pipeline};
pub use function::{Function, FunctionError, FunctionStats, MergeOutcome, SimpleFunction};
pub use scheduler::{Scheduler, SchedulerError, SchedulerStats, SimpleScheduler};
pub use tree::{RouteProbeController, TreeController, TreeEvent, TreeState, TreeStats};

// Re-export endpoint types
pub use application::{ApplicationStats, SourceApplication};
pub use collector::{Collector, CollectorError, CollectorStats};

// Re-export config types
pub use config::{Config, ConfigError, Role};

// Re-export routing and transport types
pub use routing::{Route, RouteError, RouteLookup, StaticRoutes};
pub use transport::{
    packet_channel, DatagramSender, PacketRx, PacketTx, ReceivedDatagram, TransportError,
    TransportId, TransportState, UdpTransport,
};

// Re-export node types
pub use node::{Node, NodeError, NodeState};
