//! Wire protocol codecs
//!
//! Binary layouts for the PPTP control channel and the generic PPP
//! negotiation packets, with zero trust in input.

pub mod ppp;
pub mod pptp;

/// Errors produced while decoding wire messages.
///
/// `Truncated` means more bytes may still arrive; every other variant is a
/// framing violation that callers treat as fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("bad magic cookie 0x{0:08x}")]
    BadMagic(u32),

    #[error("declared length {0} exceeds maximum control message size")]
    Oversized(u16),

    #[error("message truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("length mismatch for message type {msg_type}: declared {declared}, expected {expected}")]
    LengthMismatch {
        msg_type: u16,
        declared: u16,
        expected: u16,
    },
}
