//! PPTP control channel messages - RFC 2637
//!
//! Every control message starts with a fixed header: magic cookie, total
//! length (header included) and message type, all big-endian. Bodies are
//! fixed-size per type; request and reply share one layout, matching the
//! on-wire structs of common PPTP daemons.

use super::CodecError;

/// Magic cookie present in every control message header
pub const PPTP_MAGIC: u32 = 0x1a2b_3c4d;

/// Protocol version 1.0
pub const PPTP_VERSION: u16 = 0x0100;

/// Firmware revision advertised in start replies
pub const FIRMWARE_REVISION: u16 = 1;

/// Control header size (magic + length + type)
pub const HEADER_SIZE: usize = 8;

/// Upper bound on any control message, and on the connection buffers
pub const CTRL_SIZE_MAX: usize = 512;

/// Fixed width of the hostname and vendor string fields
pub const STRING_SIZE: usize = 64;

/// Control message types
pub mod msg_types {
    /// Start-Control-Connection-Request
    pub const START_CTRL_CONN_RQST: u16 = 1;
    /// Start-Control-Connection-Reply
    pub const START_CTRL_CONN_RPLY: u16 = 2;
    /// Stop-Control-Connection-Request
    pub const STOP_CTRL_CONN_RQST: u16 = 3;
    /// Stop-Control-Connection-Reply
    pub const STOP_CTRL_CONN_RPLY: u16 = 4;
    /// Outgoing-Call-Request
    pub const OUT_CALL_RQST: u16 = 7;
    /// Outgoing-Call-Reply
    pub const OUT_CALL_RPLY: u16 = 8;
}

/// Result codes for Start-Control-Connection-Reply
pub mod conn_results {
    pub const SUCCESS: u8 = 1;
    pub const GENERAL_ERROR: u8 = 2;
    pub const ALREADY_EXISTS: u8 = 3;
    pub const VERSION_MISMATCH: u8 = 5;
}

/// Result codes for Outgoing-Call-Reply
pub mod call_results {
    pub const CONNECTED: u8 = 1;
    pub const GENERAL_ERROR: u8 = 2;
}

/// Result codes for Stop-Control-Connection-Reply
pub mod stop_results {
    pub const OK: u8 = 1;
}

/// Reason codes for Stop-Control-Connection-Request
pub mod stop_reasons {
    pub const NONE: u8 = 1;
    pub const STOP_PROTOCOL: u8 = 2;
    pub const STOP_LOCAL_SHUTDOWN: u8 = 3;
}

/// General error codes carried next to a result code
pub mod errors {
    pub const NONE: u8 = 0;
    pub const NOT_CONNECTED: u8 = 1;
}

/// Framing capability bits
pub mod framing {
    pub const ASYNC: u32 = 1;
    pub const SYNC: u32 = 2;
}

/// Bearer capability bits
pub mod bearer {
    pub const ANALOG: u32 = 1;
    pub const DIGITAL: u32 = 2;
}

/// Shared body of Start-Control-Connection request and reply (144 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCtrlConn {
    pub version: u16,
    pub result: u8,
    pub error: u8,
    pub framing_cap: u32,
    pub bearer_cap: u32,
    pub max_channels: u16,
    pub firmware_rev: u16,
    /// NUL-padded to 64 bytes on the wire
    pub hostname: String,
    /// NUL-padded to 64 bytes on the wire
    pub vendor: String,
}

pub const START_CTRL_CONN_SIZE: usize = HEADER_SIZE + 16 + 2 * STRING_SIZE;

/// Shared body of Stop-Control-Connection request and reply (3 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCtrlConn {
    pub reason: u8,
    pub result: u8,
    pub error: u8,
}

pub const STOP_CTRL_CONN_SIZE: usize = HEADER_SIZE + 3;

/// Shared body of Outgoing-Call request and reply (20 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutCall {
    pub call_id: u16,
    pub peer_call_id: u16,
    pub result: u8,
    pub error: u8,
    pub cause: u16,
    pub speed: u32,
    pub recv_window: u16,
    pub delay: u16,
    pub channel: u32,
}

pub const OUT_CALL_SIZE: usize = HEADER_SIZE + 20;

/// A decoded control message, fully owned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtrlMessage {
    StartRequest(StartCtrlConn),
    StartReply(StartCtrlConn),
    StopRequest(StopCtrlConn),
    StopReply(StopCtrlConn),
    OutCallRequest(OutCall),
    OutCallReply(OutCall),
    /// Well-formed message of a type this server does not handle. Carried
    /// through decode so callers can ignore it silently.
    Unknown { msg_type: u16, body: Vec<u8> },
}

/// Validated control header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtrlHeader {
    pub length: u16,
    pub msg_type: u16,
}

/// Validate the fixed header without requiring the full body.
///
/// Returns `Truncated` until at least a header's worth of bytes is buffered,
/// then checks the magic cookie and the declared length bounds.
pub fn peek_header(buf: &[u8]) -> Result<CtrlHeader, CodecError> {
    if buf.len() < HEADER_SIZE {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE,
            have: buf.len(),
        });
    }

    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != PPTP_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }

    let length = u16::from_be_bytes([buf[4], buf[5]]);
    let msg_type = u16::from_be_bytes([buf[6], buf[7]]);

    if length as usize > CTRL_SIZE_MAX {
        return Err(CodecError::Oversized(length));
    }
    if (length as usize) < HEADER_SIZE {
        return Err(CodecError::LengthMismatch {
            msg_type,
            declared: length,
            expected: HEADER_SIZE as u16,
        });
    }

    Ok(CtrlHeader { length, msg_type })
}

/// Decode one control message from the front of `buf`.
pub fn decode(buf: &[u8]) -> Result<CtrlMessage, CodecError> {
    let hdr = peek_header(buf)?;
    let len = hdr.length as usize;
    if buf.len() < len {
        return Err(CodecError::Truncated {
            needed: len,
            have: buf.len(),
        });
    }

    let body = &buf[HEADER_SIZE..len];

    match hdr.msg_type {
        msg_types::START_CTRL_CONN_RQST => {
            expect_size(&hdr, START_CTRL_CONN_SIZE)?;
            Ok(CtrlMessage::StartRequest(decode_start(body)))
        }
        msg_types::START_CTRL_CONN_RPLY => {
            expect_size(&hdr, START_CTRL_CONN_SIZE)?;
            Ok(CtrlMessage::StartReply(decode_start(body)))
        }
        msg_types::STOP_CTRL_CONN_RQST => {
            expect_size(&hdr, STOP_CTRL_CONN_SIZE)?;
            Ok(CtrlMessage::StopRequest(decode_stop(body)))
        }
        msg_types::STOP_CTRL_CONN_RPLY => {
            expect_size(&hdr, STOP_CTRL_CONN_SIZE)?;
            Ok(CtrlMessage::StopReply(decode_stop(body)))
        }
        msg_types::OUT_CALL_RQST => {
            expect_size(&hdr, OUT_CALL_SIZE)?;
            Ok(CtrlMessage::OutCallRequest(decode_out_call(body)))
        }
        msg_types::OUT_CALL_RPLY => {
            expect_size(&hdr, OUT_CALL_SIZE)?;
            Ok(CtrlMessage::OutCallReply(decode_out_call(body)))
        }
        other => Ok(CtrlMessage::Unknown {
            msg_type: other,
            body: body.to_vec(),
        }),
    }
}

/// Encode a control message to wire bytes.
pub fn encode(msg: &CtrlMessage) -> Vec<u8> {
    match msg {
        CtrlMessage::StartRequest(m) => {
            encode_with(msg_types::START_CTRL_CONN_RQST, START_CTRL_CONN_SIZE, |b| {
                encode_start(b, m)
            })
        }
        CtrlMessage::StartReply(m) => {
            encode_with(msg_types::START_CTRL_CONN_RPLY, START_CTRL_CONN_SIZE, |b| {
                encode_start(b, m)
            })
        }
        CtrlMessage::StopRequest(m) => {
            encode_with(msg_types::STOP_CTRL_CONN_RQST, STOP_CTRL_CONN_SIZE, |b| {
                encode_stop(b, m)
            })
        }
        CtrlMessage::StopReply(m) => {
            encode_with(msg_types::STOP_CTRL_CONN_RPLY, STOP_CTRL_CONN_SIZE, |b| {
                encode_stop(b, m)
            })
        }
        CtrlMessage::OutCallRequest(m) => {
            encode_with(msg_types::OUT_CALL_RQST, OUT_CALL_SIZE, |b| {
                encode_out_call(b, m)
            })
        }
        CtrlMessage::OutCallReply(m) => {
            encode_with(msg_types::OUT_CALL_RPLY, OUT_CALL_SIZE, |b| {
                encode_out_call(b, m)
            })
        }
        CtrlMessage::Unknown { msg_type, body } => {
            encode_with(*msg_type, HEADER_SIZE + body.len(), |b| {
                b.extend_from_slice(body)
            })
        }
    }
}

fn expect_size(hdr: &CtrlHeader, expected: usize) -> Result<(), CodecError> {
    if hdr.length as usize != expected {
        return Err(CodecError::LengthMismatch {
            msg_type: hdr.msg_type,
            declared: hdr.length,
            expected: expected as u16,
        });
    }
    Ok(())
}

fn encode_with(msg_type: u16, size: usize, fill: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&PPTP_MAGIC.to_be_bytes());
    buf.extend_from_slice(&(size as u16).to_be_bytes());
    buf.extend_from_slice(&msg_type.to_be_bytes());
    fill(&mut buf);
    debug_assert_eq!(buf.len(), size);
    buf
}

fn be16(body: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([body[off], body[off + 1]])
}

fn be32(body: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([body[off], body[off + 1], body[off + 2], body[off + 3]])
}

/// Read a fixed-width NUL-padded string field
fn decode_string(body: &[u8], off: usize) -> String {
    let field = &body[off..off + STRING_SIZE];
    let end = field.iter().position(|&b| b == 0).unwrap_or(STRING_SIZE);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Write a string into a fixed-width NUL-padded field, truncating to fit
fn encode_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(STRING_SIZE);
    buf.extend_from_slice(&bytes[..n]);
    buf.resize(buf.len() + (STRING_SIZE - n), 0);
}

fn decode_start(body: &[u8]) -> StartCtrlConn {
    StartCtrlConn {
        version: be16(body, 0),
        result: body[2],
        error: body[3],
        framing_cap: be32(body, 4),
        bearer_cap: be32(body, 8),
        max_channels: be16(body, 12),
        firmware_rev: be16(body, 14),
        hostname: decode_string(body, 16),
        vendor: decode_string(body, 16 + STRING_SIZE),
    }
}

fn encode_start(buf: &mut Vec<u8>, m: &StartCtrlConn) {
    buf.extend_from_slice(&m.version.to_be_bytes());
    buf.push(m.result);
    buf.push(m.error);
    buf.extend_from_slice(&m.framing_cap.to_be_bytes());
    buf.extend_from_slice(&m.bearer_cap.to_be_bytes());
    buf.extend_from_slice(&m.max_channels.to_be_bytes());
    buf.extend_from_slice(&m.firmware_rev.to_be_bytes());
    encode_string(buf, &m.hostname);
    encode_string(buf, &m.vendor);
}

fn decode_stop(body: &[u8]) -> StopCtrlConn {
    StopCtrlConn {
        reason: body[0],
        result: body[1],
        error: body[2],
    }
}

fn encode_stop(buf: &mut Vec<u8>, m: &StopCtrlConn) {
    buf.push(m.reason);
    buf.push(m.result);
    buf.push(m.error);
}

fn decode_out_call(body: &[u8]) -> OutCall {
    OutCall {
        call_id: be16(body, 0),
        peer_call_id: be16(body, 2),
        result: body[4],
        error: body[5],
        cause: be16(body, 6),
        speed: be32(body, 8),
        recv_window: be16(body, 12),
        delay: be16(body, 14),
        channel: be32(body, 16),
    }
}

fn encode_out_call(buf: &mut Vec<u8>, m: &OutCall) {
    buf.extend_from_slice(&m.call_id.to_be_bytes());
    buf.extend_from_slice(&m.peer_call_id.to_be_bytes());
    buf.push(m.result);
    buf.push(m.error);
    buf.extend_from_slice(&m.cause.to_be_bytes());
    buf.extend_from_slice(&m.speed.to_be_bytes());
    buf.extend_from_slice(&m.recv_window.to_be_bytes());
    buf.extend_from_slice(&m.delay.to_be_bytes());
    buf.extend_from_slice(&m.channel.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_start() -> StartCtrlConn {
        StartCtrlConn {
            version: PPTP_VERSION,
            result: 0,
            error: 0,
            framing_cap: framing::SYNC,
            bearer_cap: bearer::DIGITAL,
            max_channels: 1,
            firmware_rev: FIRMWARE_REVISION,
            hostname: "client".into(),
            vendor: "test".into(),
        }
    }

    fn sample_out_call() -> OutCall {
        OutCall {
            call_id: 7,
            peer_call_id: 0,
            result: 0,
            error: 0,
            cause: 0,
            speed: 100_000_000,
            recv_window: 64,
            delay: 0,
            channel: 0,
        }
    }

    #[test]
    fn test_start_request_roundtrip() {
        let msg = CtrlMessage::StartRequest(sample_start());
        let wire = encode(&msg);
        assert_eq!(wire.len(), START_CTRL_CONN_SIZE);
        assert_eq!(decode(&wire).unwrap(), msg);
    }

    #[test]
    fn test_roundtrip_all_types() {
        let msgs = [
            CtrlMessage::StartRequest(sample_start()),
            CtrlMessage::StartReply(sample_start()),
            CtrlMessage::StopRequest(StopCtrlConn {
                reason: stop_reasons::NONE,
                result: 0,
                error: 0,
            }),
            CtrlMessage::StopReply(StopCtrlConn {
                reason: 0,
                result: stop_results::OK,
                error: 0,
            }),
            CtrlMessage::OutCallRequest(sample_out_call()),
            CtrlMessage::OutCallReply(sample_out_call()),
            CtrlMessage::Unknown {
                msg_type: 14,
                body: vec![1, 2, 3, 4],
            },
        ];

        for msg in msgs {
            assert_eq!(decode(&encode(&msg)).unwrap(), msg);
        }
    }

    #[test]
    fn test_roundtrip_maximal_strings() {
        let mut m = sample_start();
        m.hostname = "h".repeat(STRING_SIZE);
        m.vendor = "v".repeat(STRING_SIZE);
        let msg = CtrlMessage::StartRequest(m);

        let wire = encode(&msg);
        // Fixed-width fields never overrun the declared size.
        assert_eq!(wire.len(), START_CTRL_CONN_SIZE);
        assert_eq!(decode(&wire).unwrap(), msg);
    }

    #[test]
    fn test_string_nul_padding() {
        let wire = encode(&CtrlMessage::StartReply(sample_start()));
        let hostname_field = &wire[HEADER_SIZE + 16..HEADER_SIZE + 16 + STRING_SIZE];
        assert_eq!(&hostname_field[..6], b"client");
        assert!(hostname_field[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bad_magic() {
        let mut wire = encode(&CtrlMessage::StartRequest(sample_start()));
        wire[0] = 0xff;
        assert!(matches!(decode(&wire), Err(CodecError::BadMagic(_))));
    }

    #[test]
    fn test_truncated_header() {
        let err = decode(&[0x1a, 0x2b]).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: HEADER_SIZE,
                have: 2
            }
        );
    }

    #[test]
    fn test_truncated_body() {
        let wire = encode(&CtrlMessage::StartRequest(sample_start()));
        for n in HEADER_SIZE..wire.len() {
            let err = decode(&wire[..n]).unwrap_err();
            assert_eq!(
                err,
                CodecError::Truncated {
                    needed: START_CTRL_CONN_SIZE,
                    have: n
                }
            );
        }
    }

    #[test]
    fn test_oversized() {
        let mut wire = encode(&CtrlMessage::StartRequest(sample_start()));
        let bogus = (CTRL_SIZE_MAX as u16) + 1;
        wire[4..6].copy_from_slice(&bogus.to_be_bytes());
        assert_eq!(decode(&wire), Err(CodecError::Oversized(bogus)));
    }

    #[test]
    fn test_length_mismatch() {
        // Declared length matches the buffer but not the fixed size for the
        // type: a stop request padded out to 16 bytes.
        let mut wire = encode(&CtrlMessage::StopRequest(StopCtrlConn {
            reason: 1,
            result: 0,
            error: 0,
        }));
        wire.resize(16, 0);
        wire[4..6].copy_from_slice(&16u16.to_be_bytes());
        assert_eq!(
            decode(&wire),
            Err(CodecError::LengthMismatch {
                msg_type: msg_types::STOP_CTRL_CONN_RQST,
                declared: 16,
                expected: STOP_CTRL_CONN_SIZE as u16,
            })
        );
    }

    #[test]
    fn test_declared_length_below_header() {
        let mut wire = encode(&CtrlMessage::StopRequest(StopCtrlConn {
            reason: 1,
            result: 0,
            error: 0,
        }));
        wire[4..6].copy_from_slice(&4u16.to_be_bytes());
        assert!(matches!(
            decode(&wire),
            Err(CodecError::LengthMismatch { declared: 4, .. })
        ));
    }

    #[test]
    fn test_unknown_type_decodes() {
        // Echo-Request (type 5) is not handled by this server but must
        // still decode as well-formed.
        let msg = CtrlMessage::Unknown {
            msg_type: 5,
            body: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let wire = encode(&msg);
        match decode(&wire).unwrap() {
            CtrlMessage::Unknown { msg_type, body } => {
                assert_eq!(msg_type, 5);
                assert_eq!(body, vec![0xde, 0xad, 0xbe, 0xef]);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_peek_header() {
        let wire = encode(&CtrlMessage::OutCallRequest(sample_out_call()));
        let hdr = peek_header(&wire[..HEADER_SIZE]).unwrap();
        assert_eq!(hdr.length as usize, OUT_CALL_SIZE);
        assert_eq!(hdr.msg_type, msg_types::OUT_CALL_RQST);
    }
}
