//! Protocol error types.

use thiserror::Error;

/// Integrity violations found while decoding, framing or merging DATP
/// messages.
///
/// Every variant means the current datagram cannot be trusted any further.
/// Callers drop the offending datagram (or message) and keep running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message too short: expected at least {expected}, got {got}")]
    MessageTooShort { expected: usize, got: usize },

    #[error("header size mismatch: flags announce {expected} bytes, consumed {consumed}")]
    HeaderSizeMismatch { expected: usize, consumed: usize },

    #[error("header chaining flag set (0x{0:02x}), chained headers are not supported")]
    UnsupportedHeaderChain(u8),

    #[error("payload truncated: header declares {declared} bytes, {available} available")]
    PayloadTruncated { declared: usize, available: usize },

    #[error("payload length {0} is not a whole number of 4-byte data headers")]
    MisalignedPayload(usize),

    #[error("uneven merge payloads: new message has {new_len} bytes, existing has {existing_len}")]
    UnevenMergePayloads { new_len: usize, existing_len: usize },

    #[error("non-uniform merge counters: chunk {chunk} carries {got}, expected {expected}")]
    NonUniformCounters { expected: u32, got: u32, chunk: usize },
}
