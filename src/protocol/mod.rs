//! RFC6455 wire protocol.
//!
//! - `frame`: frame codec (masked client frames in, unmasked server frames out)
//! - `handshake`: HTTP/1.1 upgrade request parsing and 101/400 responses
//! - `close`: close status codes

pub mod close;
pub mod frame;
pub mod handshake;

pub use frame::{Frame, Opcode, ParseResult};
