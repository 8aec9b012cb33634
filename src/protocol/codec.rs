//! Incremental frame decoder
//!
//! Bytes arrive from a non-blocking socket in arbitrary pieces. The decoder
//! keeps the unconsumed tail and yields frames only once they are complete,
//! so decoding can resume after any split.

use super::ProtocolError;
use super::frame::{Frame, HEADER_LEN, Header, MAX_PAYLOAD_LEN};

/// Buffered, restartable frame decoder
pub struct FrameDecoder {
    buf: Vec<u8>,
    start: usize,
    max_payload: usize,
    failed: bool,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            max_payload: max_payload.min(MAX_PAYLOAD_LEN),
            failed: false,
        }
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.start > 0 && self.start >= self.buf.len() / 2 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete frame
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// After a protocol error the stream cannot be resynchronised and every
    /// further call fails.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.failed {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                available: 0,
            });
        }
        let pending = &self.buf[self.start..];
        if pending.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = match Header::parse(pending, self.max_payload) {
            Ok(h) => h,
            Err(e) => {
                self.failed = true;
                return Err(e);
            }
        };
        let total = HEADER_LEN + header.size;
        if pending.len() < total {
            return Ok(None);
        }

        let frame = header.into_frame(pending[HEADER_LEN..total].to_vec());
        self.start += total;
        if self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
        }
        Ok(Some(frame))
    }

    /// Iterate over all complete frames currently buffered
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LEN)
    }
}

/// Lazy iterator over buffered frames; stops at the first error
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.decoder.failed {
            return None;
        }
        self.decoder.next_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DeviceAddress, Interface, Timestamp};
    use crate::protocol::frame::MessageType;

    fn frame(tag: u32, payload: &[u8]) -> Frame {
        Frame {
            msg_type: MessageType::Request,
            address: DeviceAddress::new(Interface::POSITION, 0),
            time: Timestamp::new(1, 2),
            timestamp: Timestamp::new(3, 4),
            tag,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let a = frame(1, &[1, 2, 3]);
        let b = frame(2, &[]);
        let mut stream = a.encode();
        stream.extend(b.encode());

        let mut decoder = FrameDecoder::default();
        let mut out = Vec::new();
        for byte in &stream {
            decoder.extend(std::slice::from_ref(byte));
            out.extend(decoder.frames().map(|f| f.unwrap()));
        }
        assert_eq!(out, vec![a, b]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_tail_kept() {
        let a = frame(7, &[9; 100]);
        let bytes = a.encode();
        let mut decoder = FrameDecoder::default();
        decoder.extend(&bytes[..50]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 50);
        decoder.extend(&bytes[50..]);
        assert_eq!(decoder.next_frame().unwrap(), Some(a));
    }

    #[test]
    fn test_encode_of_decode_is_identity() {
        let mut stream = Vec::new();
        for tag in 0..5 {
            stream.extend(frame(tag, &vec![tag as u8; tag as usize * 10]).encode());
        }
        let mut decoder = FrameDecoder::default();
        decoder.extend(&stream);
        let mut reencoded = Vec::new();
        for f in decoder.frames() {
            f.unwrap().encode_into(&mut reencoded);
        }
        assert_eq!(reencoded, stream);
    }

    #[test]
    fn test_error_poisons_decoder() {
        let mut bytes = frame(1, &[1]).encode();
        bytes[0] = 0;
        let mut decoder = FrameDecoder::default();
        decoder.extend(&bytes);
        let results: Vec<_> = decoder.frames().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());

        decoder.extend(&frame(2, &[]).encode());
        assert!(decoder.next_frame().is_err());
        assert_eq!(decoder.frames().count(), 0);
    }

    #[test]
    fn test_configured_limit() {
        let mut decoder = FrameDecoder::new(16);
        decoder.extend(&frame(1, &[0; 17]).encode());
        assert_eq!(
            decoder.next_frame(),
            Err(ProtocolError::PayloadTooLarge { size: 17, max: 16 })
        );
    }
}
