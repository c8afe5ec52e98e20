//! RFC6455 frame codec.
//!
//! Decoding works on a borrowed byte slice and never consumes it: the caller
//! advances its buffer by the returned byte count only when a frame is
//! complete, so a partial frame is simply re-parsed once more bytes arrive.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               | Masking-key, if MASK set to 1 |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::close;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest CLOSE reason, leaving room for the 2-byte status code.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

const FIN_BIT: u8 = 0b1000_0000;
const MASK_BIT: u8 = 0b1000_0000;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// Map a wire nibble to an opcode. Reserved values yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    /// CLOSE, PING and PONG.
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// A single WebSocket frame. The payload is always held unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, fin: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Final TEXT frame carrying the UTF-8 bytes of `text`.
    pub fn text(text: &str) -> Self {
        Self::new(Opcode::Text, true, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Final BINARY frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, true, data)
    }

    /// CLOSE frame with a status code and a reason truncated to fit the
    /// control payload limit. Truncation never splits a UTF-8 sequence.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut end = reason.len().min(MAX_CLOSE_REASON);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }

        let mut payload = BytesMut::with_capacity(2 + end);
        payload.put_u16(code);
        payload.put_slice(&reason.as_bytes()[..end]);
        Self::new(Opcode::Close, true, payload.freeze())
    }

    /// PING frame. Payloads over 125 bytes are rejected.
    pub fn ping(payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        Self::control(Opcode::Ping, payload.into())
    }

    /// PONG frame. Payloads over 125 bytes are rejected.
    pub fn pong(payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        Self::control(Opcode::Pong, payload.into())
    }

    fn control(opcode: Opcode, payload: Bytes) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::ControlFrameTooLarge(payload.len()));
        }
        Ok(Self::new(opcode, true, payload))
    }

    /// Status code and reason of a CLOSE payload.
    ///
    /// Payloads shorter than two bytes report `1005` (no status) and an
    /// empty reason. Invalid UTF-8 in the reason is replaced, not rejected.
    pub fn close_payload(&self) -> (u16, String) {
        if self.payload.len() < 2 {
            return (close::NO_STATUS, String::new());
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        (code, reason)
    }

    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Size of this frame on the wire when sent unmasked.
    pub fn encoded_len(&self) -> usize {
        header_len(self.payload.len(), false) + self.payload.len()
    }
}

/// Decode result.
#[derive(Debug)]
pub enum ParseResult {
    /// A full frame and the number of input bytes it occupied.
    Complete(Frame, usize),
    /// The input ends before the frame does.
    Incomplete,
    /// The frame violates the protocol.
    Error(ProtocolError),
}

/// Decode one masked client frame from the start of `input`.
///
/// Payloads larger than `limit` bytes are rejected as soon as the length
/// field is readable, before the payload itself arrives.
pub fn decode(input: &[u8], limit: usize) -> ParseResult {
    parse(input, true, limit)
}

/// Decode one unmasked server frame from the start of `input`.
pub fn decode_unmasked(input: &[u8], limit: usize) -> ParseResult {
    parse(input, false, limit)
}

fn parse(input: &[u8], expect_mask: bool, limit: usize) -> ParseResult {
    if input.len() < 2 {
        return ParseResult::Incomplete;
    }

    let b0 = input[0];
    let b1 = input[1];

    let fin = b0 & FIN_BIT != 0;
    let opcode = match Opcode::from_u8(b0 & 0x0F) {
        Some(op) => op,
        None => return ParseResult::Error(ProtocolError::UnknownOpcode(b0 & 0x0F)),
    };

    let rsv = (b0 >> 4) & 0b111;
    if rsv != 0 {
        return ParseResult::Error(ProtocolError::ReservedBits(rsv));
    }

    let masked = b1 & MASK_BIT != 0;
    if masked != expect_mask {
        return ParseResult::Error(if expect_mask {
            ProtocolError::UnmaskedClientFrame
        } else {
            ProtocolError::MaskedServerFrame
        });
    }

    let mut offset = 2;
    let declared = match b1 & 0x7F {
        LEN_16 => {
            if input.len() < offset + 2 {
                return ParseResult::Incomplete;
            }
            let len = u16::from_be_bytes([input[2], input[3]]);
            offset += 2;
            u64::from(len)
        }
        LEN_64 => {
            if input.len() < offset + 8 {
                return ParseResult::Incomplete;
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&input[2..10]);
            offset += 8;
            let len = u64::from_be_bytes(raw);
            // The most significant bit must be zero.
            if len >> 63 != 0 {
                return ParseResult::Error(ProtocolError::LengthOverflow(len));
            }
            len
        }
        short => u64::from(short),
    };

    let len = match usize::try_from(declared) {
        Ok(len) => len,
        Err(_) => return ParseResult::Error(ProtocolError::LengthOverflow(declared)),
    };

    if opcode.is_control() {
        if len > MAX_CONTROL_PAYLOAD {
            return ParseResult::Error(ProtocolError::ControlFrameTooLarge(len));
        }
        if !fin {
            return ParseResult::Error(ProtocolError::FragmentedControlFrame);
        }
    }

    if len > limit {
        return ParseResult::Error(ProtocolError::PayloadTooLarge { len, limit });
    }

    let mut key = [0u8; 4];
    if expect_mask {
        if input.len() < offset + 4 {
            return ParseResult::Incomplete;
        }
        key.copy_from_slice(&input[offset..offset + 4]);
        offset += 4;
    }

    if input.len() - offset < len {
        return ParseResult::Incomplete;
    }

    let mut payload = BytesMut::from(&input[offset..offset + len]);
    if expect_mask {
        apply_mask(&mut payload, key);
    }

    ParseResult::Complete(Frame::new(opcode, fin, payload.freeze()), offset + len)
}

/// XOR `data` in place with the 4-byte masking key.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a server frame (never masked).
pub fn encode(frame: &Frame) -> BytesMut {
    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    encode_into(frame, &mut buf);
    buf
}

/// Encode a server frame into an existing buffer.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) {
    put_header(frame, buf, false);
    buf.extend_from_slice(&frame.payload);
}

/// Encode a frame the way a client sends it, masked with `key`.
pub fn encode_masked(frame: &Frame, key: [u8; 4]) -> BytesMut {
    let len = frame.payload.len();
    let mut buf = BytesMut::with_capacity(header_len(len, true) + len);
    put_header(frame, &mut buf, true);
    buf.put_slice(&key);

    let start = buf.len();
    buf.extend_from_slice(&frame.payload);
    apply_mask(&mut buf[start..], key);
    buf
}

fn put_header(frame: &Frame, buf: &mut BytesMut, masked: bool) {
    let fin = if frame.fin { FIN_BIT } else { 0 };
    buf.put_u8(fin | frame.opcode.as_u8());

    let mask = if masked { MASK_BIT } else { 0 };
    let len = frame.payload.len();
    if len <= MAX_CONTROL_PAYLOAD {
        buf.put_u8(mask | len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(mask | LEN_16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask | LEN_64);
        buf.put_u64(len as u64);
    }
}

fn header_len(payload_len: usize, masked: bool) -> usize {
    let len_bytes = if payload_len <= MAX_CONTROL_PAYLOAD {
        0
    } else if payload_len <= u16::MAX as usize {
        2
    } else {
        8
    };
    2 + len_bytes + if masked { 4 } else { 0 }
}
