//! Echo listener.
//!
//! Sends every message back to its sender: TEXT as TEXT, BINARY as BINARY.
//! Used by the `ws-engine` binary and handy for load testing.

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::listener::Listener;
use crate::session::Connection;

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoListener;

impl Listener for EchoListener {
    fn on_open(&self, conn: &Connection) {
        info!(conn_id = conn.id(), peer = %conn.peer_addr(), "Client connected");
    }

    fn on_message(&self, conn: &Connection, message: &str) {
        if let Err(e) = conn.send_message(message) {
            debug!(conn_id = conn.id(), error = %e, "Echo dropped");
        }
    }

    fn on_binary(&self, conn: &Connection, data: &[u8]) {
        if let Err(e) = conn.send_binary(data.to_vec()) {
            debug!(conn_id = conn.id(), error = %e, "Echo dropped");
        }
    }

    fn on_close(&self, conn: &Connection, code: u16, reason: &str, remote: bool) {
        info!(
            conn_id = conn.id(),
            peer = %conn.peer_addr(),
            code,
            reason,
            remote,
            "Client disconnected"
        );
    }

    fn on_error(&self, conn: Option<&Connection>, error: &Error) {
        match conn {
            Some(conn) => warn!(conn_id = conn.id(), error = %error, "Connection error"),
            None => warn!(error = %error, "Server error"),
        }
    }
}
