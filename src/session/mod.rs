//! Connection sessions.
//!
//! A session owns one upgraded socket for its whole life. It splits the
//! socket and runs two tasks:
//! - reader: decodes inbound frames and calls the listener
//! - writer: drains the outbound queue onto the socket
//!
//! The session task itself only supervises: it waits for the reader, gives
//! the peer a bounded grace period to finish the close handshake, waits a
//! bounded time for the writer, and finally delivers `on_close` once.

mod connection;
mod reader;
mod state;
mod writer;

pub use connection::Connection;
pub use state::{CloseOutcome, Phase};

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::listener::Listener;
use crate::protocol::{close, Frame};
use connection::Signal;

/// One accepted, upgraded connection.
pub struct Session<S> {
    stream: S,
    buffered: BytesMut,
    conn: Connection,
    outbound: mpsc::UnboundedReceiver<Frame>,
    signal: watch::Receiver<Signal>,
    listener: Arc<dyn Listener>,
    config: WebSocketConfig,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        id: u64,
        stream: S,
        peer: SocketAddr,
        listener: Arc<dyn Listener>,
        config: WebSocketConfig,
    ) -> Self {
        let (conn, outbound, signal) = Connection::new(id, peer);
        Self {
            stream,
            buffered: BytesMut::new(),
            conn,
            outbound,
            signal,
            listener,
            config,
        }
    }

    /// Seed the read buffer with bytes that arrived with the handshake.
    pub fn with_buffered(mut self, buffered: BytesMut) -> Self {
        self.buffered = buffered;
        self
    }

    /// Handle for this session, usable before `run` starts.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Drive the session until it terminates.
    pub async fn run(self) {
        let Session {
            stream,
            buffered,
            conn,
            outbound,
            mut signal,
            listener,
            config,
        } = self;

        debug!(conn_id = conn.id(), peer = %conn.peer_addr(), "Session started");

        // Declared before the task guards so it drops after them: a cancelled
        // session stops both tasks first, then reports `on_close`.
        let teardown = Teardown {
            conn: conn.clone(),
            listener: Arc::clone(&listener),
        };

        let (read_half, write_half) = tokio::io::split(stream);

        let mut reader = AbortOnDrop(tokio::spawn(reader::read_loop(
            read_half,
            buffered,
            conn.clone(),
            Arc::clone(&listener),
            config.max_frame_size,
        )));
        let mut writer = AbortOnDrop(tokio::spawn(writer::write_loop(
            write_half,
            outbound,
            conn.clone(),
            Arc::clone(&listener),
            config.writer_poll_interval,
        )));

        let finished = tokio::select! {
            res = &mut reader.0 => Ok(res),
            sig = closing(&mut signal) => Err(sig),
        };

        let reader_result = match finished {
            Ok(res) => res,
            Err(sig) => {
                let grace = if sig == Signal::Abort {
                    Duration::ZERO
                } else {
                    config.close_timeout
                };
                match timeout(grace, &mut reader.0).await {
                    Ok(res) => res,
                    Err(_) => {
                        debug!(conn_id = conn.id(), "Close handshake timed out");
                        reader.0.abort();
                        conn.abort(
                            CloseOutcome::local(close::ABNORMAL, "Close handshake timed out"),
                            true,
                        );
                        Ok(())
                    }
                }
            }
        };
        if let Err(e) = reader_result {
            report_crash(&conn, listener.as_ref(), "reader", e);
        }
        conn.finish_reading();

        match timeout(config.close_timeout, &mut writer.0).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => report_crash(&conn, listener.as_ref(), "writer", e),
            Err(_) => {
                warn!(conn_id = conn.id(), "Writer did not finish in time, aborting");
                writer.0.abort();
            }
        }

        drop(reader);
        drop(writer);
        teardown.deliver();
    }
}

/// Aborts the task when dropped, so a cancelled session leaves no task
/// holding its socket.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Delivers `on_close` exactly once, whether the session finished or was
/// cancelled mid-way.
struct Teardown {
    conn: Connection,
    listener: Arc<dyn Listener>,
}

impl Teardown {
    fn deliver(&self) {
        let conn = &self.conn;
        if let Some(outcome) = conn.finish() {
            debug!(
                conn_id = conn.id(),
                peer = %conn.peer_addr(),
                code = outcome.code,
                reason = %outcome.reason,
                remote = outcome.remote,
                "Session closed"
            );
            self.listener.on_close(conn, outcome.code, &outcome.reason, outcome.remote);
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        // Only does work when `run` was cancelled before it finished.
        self.conn
            .abort(CloseOutcome::local(close::ABNORMAL, "Session cancelled"), true);
        self.deliver();
    }
}

/// Wait until the session leaves `Signal::Running`.
async fn closing(signal: &mut watch::Receiver<Signal>) -> Signal {
    loop {
        let current = *signal.borrow_and_update();
        if current != Signal::Running {
            return current;
        }
        if signal.changed().await.is_err() {
            return Signal::Abort;
        }
    }
}

/// A task died without finishing its loop: report 1011 and close.
fn report_crash(conn: &Connection, listener: &dyn Listener, task: &str, e: JoinError) {
    if e.is_cancelled() {
        return;
    }
    error!(conn_id = conn.id(), task, error = %e, "Session task crashed");
    listener.on_error(Some(conn), &Error::Internal(format!("{task} task failed: {e}")));
    conn.fail(close::INTERNAL_ERROR, "Internal error");
}
