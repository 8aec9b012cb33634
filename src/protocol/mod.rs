//! Wire protocol
//!
//! # Framing
//!
//! Every message is a fixed 32-byte header followed by an opaque payload.
//! All integers are big-endian (network byte order).
//!
//! ```text
//! ┌────────┬────────┬───────────┬────────┬──────────────────┬──────────────────┬────────┬────────┐
//! │ stx    │ type   │ interface │ index  │ time (sec, usec) │ stamp (sec,usec) │ tag    │ size   │
//! │ u16    │ u16    │ u16       │ u16    │ 2 × u32          │ 2 × u32          │ u32    │ u32    │
//! └────────┴────────┴───────────┴────────┴──────────────────┴──────────────────┴────────┴────────┘
//! ```
//!
//! - `stx` is always `0x5878`
//! - `time` is when the frame was sent, `stamp` when its data was produced
//! - `tag` correlates a reply with its request, zero on data frames
//! - `size` is the payload length; header plus payload never exceeds 8192 bytes
//!
//! Right after accepting a connection the server sends a 32-byte,
//! NUL-padded banner (`Sabha v.<version>`).
//!
//! ## Message flow
//!
//! - **DATA** (server → client): one device sample; a zero-length **SYNCH**
//!   closes each push/pull round
//! - **CMD** (client → server): fire-and-forget device command
//! - **REQ** (client → server): configuration request, answered by exactly
//!   one **RESP_ACK**, **RESP_NACK** or **RESP_ERR** carrying the same tag
//!
//! Requests addressed to the `server` interface control the session itself
//! (see [`requests`]); all others are handed to the device's driver.

pub mod bytes;
pub mod codec;
pub mod frame;
pub mod requests;

pub use codec::FrameDecoder;
pub use frame::{Frame, MessageType};
pub use requests::ServerRequest;

/// Framing violations. Any of these ends the session that produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Header does not start with the sync word
    #[error("bad sync word {0:#06x}")]
    BadStx(u16),

    /// Unknown message type code
    #[error("unknown message type {0}")]
    UnknownMessageType(u16),

    /// Payload larger than the negotiated maximum
    #[error("payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Fewer bytes than the header announces
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Message type a client may not send
    #[error("unexpected {0:?} message from client")]
    UnexpectedMessage(frame::MessageType),

    /// Frame addressed to a device that is not registered
    #[error("unknown device {0}")]
    UnknownDevice(crate::core::types::DeviceAddress),

    /// Missing or wrong authentication key
    #[error("authentication failed")]
    AuthFailed,
}
