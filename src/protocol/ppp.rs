//! PPP link negotiation packets - RFC 1661
//!
//! The negotiation header (code, identifier, length) is shared by every PPP
//! control sub-protocol; the option payload is opaque at this layer. A thin
//! PPP protocol-field header sits in front when frames travel the data path.

use super::CodecError;

/// PPP header size (protocol field only, no HDLC framing on a PPTP channel)
pub const PPP_HEADER_SIZE: usize = 2;

/// Negotiation header size (code + identifier + length)
pub const NEG_HEADER_SIZE: usize = 4;

/// PPP protocol numbers
pub mod protocols {
    /// Link Control Protocol
    pub const LCP: u16 = 0xc021;
    /// IP Control Protocol
    pub const IPCP: u16 = 0x8021;
    /// Compression Control Protocol
    pub const CCP: u16 = 0x80fd;
}

/// Negotiation packet codes
pub mod codes {
    pub const CONFIGURE_REQUEST: u8 = 1;
    pub const CONFIGURE_ACK: u8 = 2;
    pub const CONFIGURE_NAK: u8 = 3;
    pub const CONFIGURE_REJECT: u8 = 4;
    pub const TERMINATE_REQUEST: u8 = 5;
    pub const TERMINATE_ACK: u8 = 6;
    pub const CODE_REJECT: u8 = 7;
    pub const PROTOCOL_REJECT: u8 = 8;
    pub const ECHO_REQUEST: u8 = 9;
    pub const ECHO_REPLY: u8 = 10;
    pub const DISCARD_REQUEST: u8 = 11;
}

/// LCP option types this server recognizes during configure triage
pub mod options {
    /// Maximum-Receive-Unit
    pub const MRU: u8 = 1;
    /// Magic-Number
    pub const MAGIC_NUMBER: u8 = 5;
}

/// Parsed PPP frame (zero-copy reference)
#[derive(Debug)]
pub struct PppFrame<'a> {
    buffer: &'a [u8],
}

impl<'a> PppFrame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self, CodecError> {
        if buffer.len() < PPP_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: PPP_HEADER_SIZE,
                have: buffer.len(),
            });
        }
        Ok(Self { buffer })
    }

    pub fn protocol(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[PPP_HEADER_SIZE..]
    }
}

/// Wrap a negotiation packet in a PPP frame
pub fn wrap_frame(protocol: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(PPP_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&protocol.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parsed negotiation packet (zero-copy reference)
#[derive(Debug)]
pub struct NegPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> NegPacket<'a> {
    /// Parse a negotiation packet, checking the declared length against both
    /// the header minimum and the buffered bytes.
    pub fn parse(buffer: &'a [u8]) -> Result<Self, CodecError> {
        if buffer.len() < NEG_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: NEG_HEADER_SIZE,
                have: buffer.len(),
            });
        }

        let packet = Self { buffer };
        let length = packet.length() as usize;

        if length < NEG_HEADER_SIZE {
            return Err(CodecError::LengthMismatch {
                msg_type: packet.code() as u16,
                declared: packet.length(),
                expected: NEG_HEADER_SIZE as u16,
            });
        }
        if buffer.len() < length {
            return Err(CodecError::Truncated {
                needed: length,
                have: buffer.len(),
            });
        }

        Ok(packet)
    }

    pub fn code(&self) -> u8 {
        self.buffer[0]
    }

    /// Identifier for matching requests and responses
    pub fn identifier(&self) -> u8 {
        self.buffer[1]
    }

    /// Total packet length including the header
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Option bytes for Configure-*, or payload for Echo-*
    pub fn data(&self) -> &[u8] {
        &self.buffer[NEG_HEADER_SIZE..self.length() as usize]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.length() as usize]
    }

    /// Iterate over the option payload
    pub fn iter_options(&self) -> OptionIter<'_> {
        OptionIter {
            data: self.data(),
            offset: 0,
        }
    }
}

/// One option during iteration
#[derive(Debug, Clone)]
pub struct NegOption<'a> {
    pub opt_type: u8,
    /// Option data, excluding the type and length bytes
    pub data: &'a [u8],
    /// The full option bytes as they appeared on the wire
    pub raw: &'a [u8],
}

pub struct OptionIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = NegOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + 2 > self.data.len() {
            return None;
        }

        let opt_type = self.data[self.offset];
        let opt_len = self.data[self.offset + 1] as usize;

        // Option length covers the type and length bytes too.
        if opt_len < 2 || self.offset + opt_len > self.data.len() {
            return None;
        }

        let raw = &self.data[self.offset..self.offset + opt_len];
        let opt = NegOption {
            opt_type,
            data: &raw[2..],
            raw,
        };

        self.offset += opt_len;
        Some(opt)
    }
}

/// Builder for negotiation packets
#[derive(Debug)]
pub struct NegBuilder {
    code: u8,
    identifier: u8,
    data: Vec<u8>,
}

impl NegBuilder {
    pub fn new(code: u8, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            data: Vec::new(),
        }
    }

    pub fn configure_request(identifier: u8) -> Self {
        Self::new(codes::CONFIGURE_REQUEST, identifier)
    }

    pub fn configure_ack(identifier: u8) -> Self {
        Self::new(codes::CONFIGURE_ACK, identifier)
    }

    pub fn configure_reject(identifier: u8) -> Self {
        Self::new(codes::CONFIGURE_REJECT, identifier)
    }

    pub fn terminate_request(identifier: u8) -> Self {
        Self::new(codes::TERMINATE_REQUEST, identifier)
    }

    pub fn terminate_ack(identifier: u8) -> Self {
        Self::new(codes::TERMINATE_ACK, identifier)
    }

    pub fn code_reject(identifier: u8) -> Self {
        Self::new(codes::CODE_REJECT, identifier)
    }

    pub fn echo_reply(identifier: u8, magic: u32) -> Self {
        let mut builder = Self::new(codes::ECHO_REPLY, identifier);
        builder.data.extend_from_slice(&magic.to_be_bytes());
        builder
    }

    /// Append one option
    pub fn option(mut self, opt_type: u8, data: &[u8]) -> Self {
        self.data.push(opt_type);
        self.data.push((2 + data.len()) as u8);
        self.data.extend_from_slice(data);
        self
    }

    /// Replace the payload wholesale (echoing request options, or the
    /// rejected packet inside a Code-Reject)
    pub fn raw_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let length = (NEG_HEADER_SIZE + self.data.len()) as u16;
        let mut packet = Vec::with_capacity(length as usize);
        packet.push(self.code);
        packet.push(self.identifier);
        packet.extend_from_slice(&length.to_be_bytes());
        packet.extend_from_slice(&self.data);
        packet
    }
}
