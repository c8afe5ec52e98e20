//! Application callbacks.
//!
//! The engine never inspects which implementation is bound; it only calls
//! these methods. Callbacks run on the session's reader task (`on_open`,
//! `on_message`, `on_binary`, most `on_error` calls) or on the session task
//! during teardown (`on_close`), so they should not block for long.

use crate::error::Error;
use crate::session::Connection;

/// Receives events for every session accepted by a server.
pub trait Listener: Send + Sync + 'static {
    /// The handshake completed and the connection is active.
    fn on_open(&self, conn: &Connection);

    /// A TEXT message arrived.
    fn on_message(&self, conn: &Connection, message: &str);

    /// A BINARY message arrived.
    ///
    /// By default a short description is forwarded to `on_message` so binary
    /// traffic is never dropped silently.
    fn on_binary(&self, conn: &Connection, data: &[u8]) {
        let description = format!("[Binary data: {} bytes]", data.len());
        self.on_message(conn, &description);
    }

    /// The session ended. Called exactly once per session.
    ///
    /// `remote` is true when the peer sent the CLOSE frame or dropped the
    /// connection.
    fn on_close(&self, conn: &Connection, code: u16, reason: &str, remote: bool);

    /// A fault occurred. `conn` is `None` when no session existed yet.
    fn on_error(&self, conn: Option<&Connection>, error: &Error);
}
