//! Reader task: owns the inbound half, decodes frames, dispatches events.

use bytes::{Buf, BytesMut};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

use crate::error::{Error, ProtocolError};
use crate::listener::Listener;
use crate::protocol::close;
use crate::protocol::frame::{self, Frame, Opcode, ParseResult};
use crate::session::connection::Connection;
use crate::session::state::CloseOutcome;

/// Whether the reader keeps going after a frame.
enum Flow {
    Continue,
    Stop,
}

pub(super) async fn read_loop<R>(
    mut reader: R,
    mut buffer: BytesMut,
    conn: Connection,
    listener: Arc<dyn Listener>,
    max_frame_size: usize,
) where
    R: AsyncRead + Unpin,
{
    conn.activate();
    listener.on_open(&conn);

    loop {
        match frame::decode(&buffer, max_frame_size) {
            ParseResult::Complete(frame, consumed) => {
                buffer.advance(consumed);
                trace!(
                    conn_id = conn.id(),
                    opcode = ?frame.opcode,
                    fin = frame.fin,
                    len = frame.payload.len(),
                    "Received frame"
                );
                if let Flow::Stop = dispatch(frame, &conn, listener.as_ref()) {
                    return;
                }
            }

            ParseResult::Incomplete => match reader.read_buf(&mut buffer).await {
                Ok(0) => {
                    debug!(
                        conn_id = conn.id(),
                        peer = %conn.peer_addr(),
                        "Connection closed by peer (EOF)"
                    );
                    conn.abort(CloseOutcome::remote(close::ABNORMAL, ""), false);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    if is_disconnect(&e) {
                        debug!(conn_id = conn.id(), error = %e, "Connection reset by peer");
                    } else if !conn.is_closing() {
                        warn!(conn_id = conn.id(), error = %e, "Read failed");
                        listener.on_error(Some(&conn), &Error::Transport(e));
                    }
                    conn.abort(CloseOutcome::remote(close::ABNORMAL, ""), false);
                    return;
                }
            },

            ParseResult::Error(e) => {
                // The stream is out of sync past a bad header; stop reading.
                reject(&conn, listener.as_ref(), e);
                return;
            }
        }
    }
}

fn dispatch(frame: Frame, conn: &Connection, listener: &dyn Listener) -> Flow {
    match frame.opcode {
        Opcode::Text | Opcode::Binary | Opcode::Continuation if conn.is_closing() => {
            trace!(
                conn_id = conn.id(),
                opcode = ?frame.opcode,
                "Dropping data frame while closing"
            );
        }

        Opcode::Continuation => reject(conn, listener, ProtocolError::FragmentationUnsupported),
        Opcode::Text | Opcode::Binary if !frame.fin => {
            reject(conn, listener, ProtocolError::FragmentationUnsupported)
        }

        Opcode::Text => match std::str::from_utf8(&frame.payload) {
            Ok(text) => listener.on_message(conn, text),
            Err(_) => reject(conn, listener, ProtocolError::InvalidUtf8),
        },

        Opcode::Binary => listener.on_binary(conn, &frame.payload),

        Opcode::Close => {
            let (code, reason) = frame.close_payload();
            debug!(
                conn_id = conn.id(),
                peer = %conn.peer_addr(),
                code,
                reason = %reason,
                "Received CLOSE"
            );
            conn.receive_close(code, reason);
            return Flow::Stop;
        }

        Opcode::Ping => {
            trace!(conn_id = conn.id(), len = frame.payload.len(), "Received PING, sending PONG");
            conn.reply(Frame::new(Opcode::Pong, true, frame.payload));
        }

        Opcode::Pong => {
            trace!(conn_id = conn.id(), "Received PONG");
        }
    }
    Flow::Continue
}

/// Report a protocol violation and start closing with its status code.
fn reject(conn: &Connection, listener: &dyn Listener, error: ProtocolError) {
    warn!(conn_id = conn.id(), peer = %conn.peer_addr(), error = %error, "Protocol error");
    let (code, reason) = (error.close_code(), error.close_reason());
    listener.on_error(Some(conn), &Error::Protocol(error));
    conn.fail(code, reason);
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}
