//! Generic application data header: the 4-byte merge counter carried by
//! every payload chunk.

use super::error::ProtocolError;

/// Merge counter prefixed to each 4-byte payload chunk.
///
/// Zero marks an original, unmerged message. A value `n >= 2` means the
/// chunk stands for `n` originally separate messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataHeader {
    value: u32,
}

impl DataHeader {
    /// Wire size in bytes.
    pub const SIZE: usize = 4;

    pub fn new(value: u32) -> Self {
        Self { value }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn set_value(&mut self, value: u32) {
        self.value = value;
    }

    /// Number of original messages this chunk represents.
    pub fn message_count(&self) -> u32 {
        self.value.max(1)
    }

    /// Encode to wire format (u32 big-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.value.to_be_bytes()
    }

    /// Decode from the first four bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: [u8; Self::SIZE] = bytes
            .get(..Self::SIZE)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(ProtocolError::MessageTooShort {
                expected: Self::SIZE,
                got: bytes.len(),
            })?;
        Ok(Self::new(u32::from_be_bytes(raw)))
    }
}

/// Split a payload into its data headers.
///
/// The payload must be a whole number of 4-byte chunks.
pub fn data_headers(payload: &[u8]) -> Result<Vec<DataHeader>, ProtocolError> {
    if payload.len() % DataHeader::SIZE != 0 {
        return Err(ProtocolError::MisalignedPayload(payload.len()));
    }
    payload
        .chunks_exact(DataHeader::SIZE)
        .map(DataHeader::decode)
        .collect()
}

/// The single merge counter shared by every chunk of a payload.
///
/// Returns `None` for an empty payload and an error when chunks disagree.
pub fn uniform_counter(payload: &[u8]) -> Result<Option<u32>, ProtocolError> {
    let headers = data_headers(payload)?;
    let Some(first) = headers.first() else {
        return Ok(None);
    };
    for (chunk, header) in headers.iter().enumerate().skip(1) {
        if header.value() != first.value() {
            return Err(ProtocolError::NonUniformCounters {
                expected: first.value(),
                got: header.value(),
                chunk,
            });
        }
    }
    Ok(Some(first.value()))
}

/// Counter of the first chunk, or zero when the payload holds none.
pub fn leading_counter(payload: &[u8]) -> u32 {
    DataHeader::decode(payload).map(|h| h.value()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_header_roundtrip() {
        for value in [0u32, 1, 2, u32::MAX] {
            let encoded = DataHeader::new(value).encode();
            let decoded = DataHeader::decode(&encoded).unwrap();
            assert_eq!(decoded.value(), value);
        }
    }

    #[test]
    fn test_data_header_is_big_endian() {
        assert_eq!(DataHeader::new(0x0102_0304).encode(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_short_input() {
        assert_eq!(
            DataHeader::decode(&[0, 0, 1]),
            Err(ProtocolError::MessageTooShort { expected: 4, got: 3 })
        );
    }

    #[test]
    fn test_message_count() {
        assert_eq!(DataHeader::new(0).message_count(), 1);
        assert_eq!(DataHeader::new(1).message_count(), 1);
        assert_eq!(DataHeader::new(6).message_count(), 6);
    }

    #[test]
    fn test_uniform_counter() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&DataHeader::new(3).encode());
        payload.extend_from_slice(&DataHeader::new(3).encode());
        assert_eq!(uniform_counter(&payload), Ok(Some(3)));
        assert_eq!(uniform_counter(&[]), Ok(None));
    }

    #[test]
    fn test_uniform_counter_mismatch() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&DataHeader::new(2).encode());
        payload.extend_from_slice(&DataHeader::new(2).encode());
        payload.extend_from_slice(&DataHeader::new(5).encode());
        assert_eq!(
            uniform_counter(&payload),
            Err(ProtocolError::NonUniformCounters {
                expected: 2,
                got: 5,
                chunk: 2
            })
        );
    }

    #[test]
    fn test_misaligned_payload() {
        assert_eq!(
            data_headers(&[0; 6]),
            Err(ProtocolError::MisalignedPayload(6))
        );
    }

    #[test]
    fn test_leading_counter() {
        assert_eq!(leading_counter(&[]), 0);
        assert_eq!(leading_counter(&DataHeader::new(9).encode()), 9);
    }
}
