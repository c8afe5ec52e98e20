//! ws-engine: a WebSocket server engine built directly on TCP sockets.
//!
//! - `protocol`: RFC6455 frame codec and HTTP upgrade handshake
//! - `session`: per-connection reader/writer tasks and close handshake
//! - `server`: listening socket, accept loop, start/stop
//! - `listener`: application callbacks
//!
//! Features:
//! - Single-frame TEXT and BINARY messages, PING/PONG, close handshake
//! - Thread-safe sends from any task through a per-session queue
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod echo;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{Config, WebSocketConfig};
pub use echo::EchoListener;
pub use error::{Error, HandshakeError, ProtocolError, Result};
pub use listener::Listener;
pub use protocol::{Frame, Opcode};
pub use server::Server;
pub use session::{CloseOutcome, Connection, Phase, Session};
