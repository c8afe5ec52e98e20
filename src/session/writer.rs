//! Writer task: the only place that writes to the socket.

use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::listener::Listener;
use crate::protocol::close;
use crate::protocol::frame::{self, Frame, Opcode};
use crate::session::connection::Connection;
use crate::session::state::CloseOutcome;

pub(super) async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    conn: Connection,
    listener: Arc<dyn Listener>,
    poll_interval: Duration,
) where
    W: AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        // Timed dequeue so an idle writer notices the reader has gone.
        let frame = match timeout(poll_interval, outbound.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => {
                if conn.reader_done() {
                    break;
                }
                continue;
            }
        };

        buffer.clear();
        frame::encode_into(&frame, &mut buffer);

        if let Err(e) = send(&mut writer, &buffer).await {
            if !conn.is_closing() {
                warn!(conn_id = conn.id(), peer = %conn.peer_addr(), error = %e, "Write failed");
                listener.on_error(Some(&conn), &Error::Transport(e));
            } else {
                debug!(conn_id = conn.id(), error = %e, "Write failed while closing");
            }
            conn.abort(CloseOutcome::local(close::ABNORMAL, "Write failed"), true);
            return;
        }

        trace!(
            conn_id = conn.id(),
            opcode = ?frame.opcode,
            len = frame.payload.len(),
            "Sent frame"
        );

        if frame.opcode == Opcode::Close {
            // Nothing may follow our CLOSE.
            let complete = conn.mark_close_sent();
            trace!(conn_id = conn.id(), complete, "CLOSE sent");
            break;
        }
    }

    let _ = writer.shutdown().await;
}

async fn send<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}
