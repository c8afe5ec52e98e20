//! Error types for the WebSocket engine.
//!
//! Each layer raises its own typed error:
//! - `ProtocolError`: malformed or unsupported frames (frame codec)
//! - `HandshakeError`: rejected HTTP upgrade requests (handshake processor)
//! - `Error`: everything a session or the server can report to a listener
//!
//! The codec and handshake never recover from their own errors. Sessions are
//! the single place an error turns into a close transition.

use std::io;
use thiserror::Error;

use crate::protocol::close;

/// Violations of the RFC6455 framing rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("unmasked client frame")]
    UnmaskedClientFrame,

    #[error("masked server frame")]
    MaskedServerFrame,

    #[error("reserved bits set without a negotiated extension: {0:#05b}")]
    ReservedBits(u8),

    #[error("payload length {0} exceeds addressable size")]
    LengthOverflow(u64),

    #[error("payload of {len} bytes exceeds the {limit} byte frame limit")]
    PayloadTooLarge { len: usize, limit: usize },

    #[error("control frame payload of {0} bytes exceeds 125 bytes")]
    ControlFrameTooLarge(usize),

    #[error("fragmented control frame")]
    FragmentedControlFrame,

    #[error("fragmented messages are not supported")]
    FragmentationUnsupported,

    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Close status code sent to the peer for this violation.
    pub fn close_code(&self) -> u16 {
        match self {
            ProtocolError::FragmentationUnsupported => close::UNSUPPORTED_DATA,
            ProtocolError::InvalidUtf8 => close::INVALID_PAYLOAD,
            ProtocolError::PayloadTooLarge { .. } => close::MESSAGE_TOO_BIG,
            _ => close::PROTOCOL_ERROR,
        }
    }

    /// Reason text carried in the CLOSE frame.
    pub fn close_reason(&self) -> &'static str {
        match self {
            ProtocolError::FragmentationUnsupported => "Continuation frames not supported",
            ProtocolError::InvalidUtf8 => "Invalid UTF-8 in text frame",
            ProtocolError::PayloadTooLarge { .. } => "Frame too large",
            _ => "Protocol error",
        }
    }
}

/// Reasons an HTTP upgrade request is refused.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("invalid request line: {0:?}")]
    InvalidRequestLine(String),

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("Upgrade header is not websocket")]
    InvalidUpgrade,

    #[error("Connection header does not contain upgrade")]
    InvalidConnection,

    #[error("unsupported Sec-WebSocket-Version: {0:?}")]
    UnsupportedVersion(Option<String>),

    #[error("request head exceeds {0} bytes")]
    RequestTooLarge(usize),

    #[error("connection closed during handshake")]
    UnexpectedEof,

    #[error("handshake timed out")]
    Timeout,

    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),
}

impl HandshakeError {
    /// Plain-text body of the 400 response, or `None` when nothing can be sent.
    pub fn response_body(&self) -> Option<&'static str> {
        match self {
            HandshakeError::InvalidRequestLine(_) => Some("Invalid Method."),
            HandshakeError::RequestTooLarge(_) => Some("Request Header Too Large."),
            HandshakeError::MissingKey
            | HandshakeError::InvalidUpgrade
            | HandshakeError::InvalidConnection
            | HandshakeError::UnsupportedVersion(_) => Some("Invalid WebSocket Handshake."),
            HandshakeError::UnexpectedEof | HandshakeError::Timeout | HandshakeError::Io(_) => {
                None
            }
        }
    }
}

/// Errors reported by sessions and the server.
#[derive(Debug, Error)]
pub enum Error {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,
}

impl Error {
    /// Close status code associated with this error class.
    pub fn close_code(&self) -> u16 {
        match self {
            Error::Protocol(e) => e.close_code(),
            Error::Transport(_) => close::ABNORMAL,
            Error::Internal(_) => close::INTERNAL_ERROR,
            _ => close::PROTOCOL_ERROR,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
