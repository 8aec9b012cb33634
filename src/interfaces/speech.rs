//! `speech` interface: text to speak, write only

use super::Payload;
use crate::error::{Error, Result};
use crate::protocol::bytes::{PayloadReader, put_fixed_str};

/// Width of the NUL-padded text field
pub const MAX_TEXT_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpeechCommand {
    pub text: String,
}

impl SpeechCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Payload for SpeechCommand {
    /// Text longer than the field is truncated
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_TEXT_LEN);
        put_fixed_str(&mut out, &self.text, MAX_TEXT_LEN);
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != MAX_TEXT_LEN {
            return Err(Error::InvalidPacket(format!(
                "speech command is {} bytes, expected {}",
                payload.len(),
                MAX_TEXT_LEN
            )));
        }
        let text = PayloadReader::new(payload).fixed_str(MAX_TEXT_LEN)?;
        Ok(Self { text })
    }
}
