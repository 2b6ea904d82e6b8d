//! Messages and datagram framing.
//!
//! A datagram is a plain concatenation of messages, each one a DATP header
//! followed by exactly `data_length` payload bytes. There is no outer
//! length or count; the reader walks headers until the buffer is empty.

use super::error::ProtocolError;
use super::header::DatpHeader;

/// One logical application message: header plus payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub header: DatpHeader,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(header: DatpHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Size of the message on the wire.
    pub fn encoded_len(&self) -> usize {
        self.header.header_size() + self.payload.len()
    }

    /// Append header and payload to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.header.encode_into(buf);
        buf.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }
}

/// Concatenate messages into one datagram block.
pub fn encode_block<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Vec<u8> {
    let mut buf = Vec::new();
    for message in messages {
        message.encode_into(&mut buf);
    }
    buf
}

/// Iterator over the messages of a received datagram.
///
/// Yields `(header, header_size, payload)` borrowed from the datagram. The
/// first integrity error is yielded once and ends the iteration; the
/// remainder of the datagram cannot be framed.
pub struct MessageIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

/// A message framed out of a datagram, payload still borrowed.
#[derive(Debug, PartialEq, Eq)]
pub struct FramedMessage<'a> {
    pub header: DatpHeader,
    pub header_size: usize,
    pub payload: &'a [u8],
}

impl<'a> FramedMessage<'a> {
    pub fn to_message(&self) -> Message {
        Message::new(self.header.clone(), self.payload.to_vec())
    }
}

impl<'a> MessageIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn next_message(&mut self) -> Result<FramedMessage<'a>, ProtocolError> {
        let rest = &self.data[self.pos..];
        let (header, header_size) = DatpHeader::decode(rest)?;
        let declared = header.data_length() as usize;
        let available = rest.len() - header_size;
        if available < declared {
            return Err(ProtocolError::PayloadTruncated {
                declared,
                available,
            });
        }
        let payload = &rest[header_size..header_size + declared];
        self.pos += header_size + declared;
        Ok(FramedMessage {
            header,
            header_size,
            payload,
        })
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<FramedMessage<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let result = self.next_message();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DataHeader;

    fn message(application: u8, counter: u32, chunks: usize) -> Message {
        let mut payload = Vec::new();
        for _ in 0..chunks {
            payload.extend_from_slice(&DataHeader::new(counter).encode());
        }
        let header = DatpHeader::new()
            .with_application(application)
            .with_data_length(payload.len() as u8);
        Message::new(header, payload)
    }

    #[test]
    fn test_frame_multiple_messages() {
        let first = message(1, 0, 1);
        let second = message(2, 3, 2);
        let block = encode_block([&first, &second]);
        assert_eq!(block.len(), first.encoded_len() + second.encoded_len());

        let framed: Vec<_> = MessageIter::new(&block)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(framed.len(), 2);
        assert_eq!(framed[0].to_message(), first);
        assert_eq!(framed[1].to_message(), second);
        assert_eq!(framed[1].header_size, 3);
    }

    #[test]
    fn test_empty_datagram_yields_nothing() {
        assert_eq!(MessageIter::new(&[]).count(), 0);
    }

    #[test]
    fn test_zero_length_payload() {
        let header = DatpHeader::new().with_application(4);
        let block = header.encode();
        let framed: Vec<_> = MessageIter::new(&block).collect();
        assert_eq!(framed.len(), 1);
        let framed = framed.into_iter().next().unwrap().unwrap();
        assert!(framed.payload.is_empty());
    }

    #[test]
    fn test_truncated_payload_stops_iteration() {
        let good = message(1, 0, 1);
        let mut block = encode_block([&good]);
        let bad = DatpHeader::new().with_application(1).with_data_length(8);
        bad.encode_into(&mut block);
        block.extend_from_slice(&[0, 0, 0, 0]);

        let mut iter = MessageIter::new(&block);
        assert!(iter.next().unwrap().is_ok());
        assert_eq!(
            iter.next().unwrap(),
            Err(ProtocolError::PayloadTruncated {
                declared: 8,
                available: 4
            })
        );
        assert!(iter.next().is_none());
    }
}
