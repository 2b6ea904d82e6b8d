//! DATP Protocol Messages
//!
//! Wire format definitions for the Data Aggregation Transport Protocol.
//!
//! ## Message header
//!
//! Every message starts with a one-byte header field flag (HFF) followed by
//! the optional fields it announces, all big-endian:
//!
//! ```text
//! [flags:1][origin:4]?[application:1]?[priority:1]?[timestamp:8]?
//! [data_length:1]?[sequence:4]?
//! ```
//!
//! ## Payload
//!
//! `data_length` bytes follow the header, made of 4-byte generic data
//! headers (u32 merge counters). A datagram carries one or more messages
//! back to back.

mod data_header;
mod error;
mod header;
mod message;

pub use data_header::{data_headers, leading_counter, uniform_counter, DataHeader};
pub use error::ProtocolError;
pub use header::{DatpHeader, HeaderFlags, MessageId};
pub use message::{encode_block, FramedMessage, Message, MessageIter};

/// Largest payload a source may place in one datagram.
pub const MAX_DATAGRAM_PAYLOAD: usize = 1476;
