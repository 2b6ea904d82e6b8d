//! DATP message header: a one-byte flag field followed by the optional
//! fields it announces.

use super::error::ProtocolError;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Message Identifier
// ============================================================================

/// Process-local identifier assigned to a message when it is received.
///
/// Never serialized. Zero is reserved for "no message".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u32);

impl MessageId {
    /// The unset identifier.
    pub const NONE: MessageId = MessageId(0);

    /// Create a message ID from its raw value.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// True for the reserved "no message" identifier.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg:{}", self.0)
    }
}

// ============================================================================
// Header Field Flags
// ============================================================================

/// Presence bits of the header field flag byte.
///
/// ```text
/// bit 7   reserved (written as 0, ignored on decode)
/// bit 6   origin        u32
/// bit 5   application   u8
/// bit 4   priority      u8
/// bit 3   timestamp     u64
/// bit 2   data length   u8
/// bit 1   sequence      u32
/// bit 0   header chain  (not supported, must be 0)
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    pub origin: bool,
    pub application: bool,
    pub priority: bool,
    pub timestamp: bool,
    pub data_length: bool,
    pub sequence: bool,
}

impl HeaderFlags {
    pub const RESERVED: u8 = 0x80;
    pub const ORIGIN: u8 = 0x40;
    pub const APPLICATION: u8 = 0x20;
    pub const PRIORITY: u8 = 0x10;
    pub const TIMESTAMP: u8 = 0x08;
    pub const DATA_LENGTH: u8 = 0x04;
    pub const SEQUENCE: u8 = 0x02;
    pub const CHAIN: u8 = 0x01;

    /// Create flags with no optional field present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert to the wire byte.
    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.origin {
            flags |= Self::ORIGIN;
        }
        if self.application {
            flags |= Self::APPLICATION;
        }
        if self.priority {
            flags |= Self::PRIORITY;
        }
        if self.timestamp {
            flags |= Self::TIMESTAMP;
        }
        if self.data_length {
            flags |= Self::DATA_LENGTH;
        }
        if self.sequence {
            flags |= Self::SEQUENCE;
        }
        flags
    }

    /// Convert from the wire byte. Reserved and chain bits are dropped.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            origin: byte & Self::ORIGIN != 0,
            application: byte & Self::APPLICATION != 0,
            priority: byte & Self::PRIORITY != 0,
            timestamp: byte & Self::TIMESTAMP != 0,
            data_length: byte & Self::DATA_LENGTH != 0,
            sequence: byte & Self::SEQUENCE != 0,
        }
    }

    /// Serialized size of a header carrying exactly these fields.
    pub fn header_size(&self) -> usize {
        let mut size = 1;
        if self.origin {
            size += 4;
        }
        if self.application {
            size += 1;
        }
        if self.priority {
            size += 1;
        }
        if self.timestamp {
            size += 8;
        }
        if self.data_length {
            size += 1;
        }
        if self.sequence {
            size += 4;
        }
        size
    }
}

// ============================================================================
// DATP Header
// ============================================================================

/// Variable-length DATP message header.
///
/// Every optional field is absent until set; setting a field marks it
/// present, so the serialized size always follows from the flags. Getters
/// return zero for absent fields.
///
/// The message ID and receive time are bookkeeping for the local node and
/// never reach the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatpHeader {
    origin: Option<u32>,
    application: Option<u8>,
    priority: Option<u8>,
    timestamp: Option<u64>,
    data_length: Option<u8>,
    sequence: Option<u32>,
    message_id: MessageId,
    receive_time: Duration,
}

impl DatpHeader {
    /// Smallest header: the flag byte alone.
    pub const MIN_SIZE: usize = 1;
    /// Header with every optional field present.
    pub const MAX_SIZE: usize = 20;

    /// Create a header with no optional fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Presence flags for this header.
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags {
            origin: self.origin.is_some(),
            application: self.application.is_some(),
            priority: self.priority.is_some(),
            timestamp: self.timestamp.is_some(),
            data_length: self.data_length.is_some(),
            sequence: self.sequence.is_some(),
        }
    }

    /// Number of bytes `encode` produces.
    pub fn header_size(&self) -> usize {
        self.flags().header_size()
    }

    pub fn origin(&self) -> u32 {
        self.origin.unwrap_or(0)
    }

    pub fn set_origin(&mut self, origin: u32) {
        self.origin = Some(origin);
    }

    pub fn with_origin(mut self, origin: u32) -> Self {
        self.set_origin(origin);
        self
    }

    pub fn application(&self) -> u8 {
        self.application.unwrap_or(0)
    }

    pub fn set_application(&mut self, application: u8) {
        self.application = Some(application);
    }

    pub fn with_application(mut self, application: u8) -> Self {
        self.set_application(application);
        self
    }

    /// Scheduling hint; the simple scheduler ignores it.
    pub fn priority(&self) -> u8 {
        self.priority.unwrap_or(0)
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = Some(priority);
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.set_priority(priority);
        self
    }

    /// Send time in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp.unwrap_or(0)
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = Some(timestamp);
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.set_timestamp(timestamp);
        self
    }

    /// Number of payload bytes that follow this header.
    pub fn data_length(&self) -> u8 {
        self.data_length.unwrap_or(0)
    }

    pub fn set_data_length(&mut self, data_length: u8) {
        self.data_length = Some(data_length);
    }

    pub fn with_data_length(mut self, data_length: u8) -> Self {
        self.set_data_length(data_length);
        self
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.unwrap_or(0)
    }

    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = Some(sequence);
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.set_sequence(sequence);
        self
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn set_message_id(&mut self, message_id: MessageId) {
        self.message_id = message_id;
    }

    /// Local time at which this node received the message.
    pub fn receive_time(&self) -> Duration {
        self.receive_time
    }

    pub fn set_receive_time(&mut self, receive_time: Duration) {
        self.receive_time = receive_time;
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header_size());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the wire format to `buf`.
    ///
    /// ```text
    /// [flags:1][origin:4 BE]?[application:1]?[priority:1]?
    /// [timestamp:8 BE]?[data_length:1]?[sequence:4 BE]?
    /// ```
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.flags().to_byte());
        if let Some(origin) = self.origin {
            buf.extend_from_slice(&origin.to_be_bytes());
        }
        if let Some(application) = self.application {
            buf.push(application);
        }
        if let Some(priority) = self.priority {
            buf.push(priority);
        }
        if let Some(timestamp) = self.timestamp {
            buf.extend_from_slice(&timestamp.to_be_bytes());
        }
        if let Some(data_length) = self.data_length {
            buf.push(data_length);
        }
        if let Some(sequence) = self.sequence {
            buf.extend_from_slice(&sequence.to_be_bytes());
        }
    }

    /// Decode a header from the start of `bytes`.
    ///
    /// Returns the header and the number of bytes consumed, which always
    /// equals `header.header_size()`.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let flag_byte = *bytes.first().ok_or(ProtocolError::MessageTooShort {
            expected: Self::MIN_SIZE,
            got: 0,
        })?;
        if flag_byte & HeaderFlags::CHAIN != 0 {
            return Err(ProtocolError::UnsupportedHeaderChain(flag_byte));
        }

        let flags = HeaderFlags::from_byte(flag_byte);
        let expected = flags.header_size();
        if bytes.len() < expected {
            return Err(ProtocolError::MessageTooShort {
                expected,
                got: bytes.len(),
            });
        }

        let mut header = DatpHeader::new();
        let mut pos = 1;

        if flags.origin {
            header.origin = Some(u32::from_be_bytes(read_array(bytes, pos)?));
            pos += 4;
        }
        if flags.application {
            header.application = Some(bytes[pos]);
            pos += 1;
        }
        if flags.priority {
            header.priority = Some(bytes[pos]);
            pos += 1;
        }
        if flags.timestamp {
            header.timestamp = Some(u64::from_be_bytes(read_array(bytes, pos)?));
            pos += 8;
        }
        if flags.data_length {
            header.data_length = Some(bytes[pos]);
            pos += 1;
        }
        if flags.sequence {
            header.sequence = Some(u32::from_be_bytes(read_array(bytes, pos)?));
            pos += 4;
        }

        if pos != header.header_size() {
            return Err(ProtocolError::HeaderSizeMismatch {
                expected: header.header_size(),
                consumed: pos,
            });
        }

        Ok((header, pos))
    }
}

impl fmt::Display for DatpHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "app={} origin={} prio={} ts={} len={} seq={}",
            self.application(),
            self.origin(),
            self.priority(),
            self.timestamp(),
            self.data_length(),
            self.sequence()
        )
    }
}

fn read_array<const N: usize>(bytes: &[u8], pos: usize) -> Result<[u8; N], ProtocolError> {
    bytes
        .get(pos..pos + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(ProtocolError::MessageTooShort {
            expected: pos + N,
            got: bytes.len(),
        })
}
