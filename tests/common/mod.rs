//! Shared helpers for integration tests.

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use ws_engine::protocol::frame::{self, ParseResult};
use ws_engine::{Connection, Error, Frame, Listener};

pub const WAIT: Duration = Duration::from_secs(2);

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// A listener callback, as observed by the test.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open(u64),
    Message(String),
    Close {
        code: u16,
        reason: String,
        remote: bool,
    },
    Error(String),
}

/// Forwards every callback to a channel. Optionally echoes TEXT.
pub struct RecordingListener {
    events: mpsc::UnboundedSender<Event>,
    echo: bool,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        Self::build(false)
    }

    pub fn echoing() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        Self::build(true)
    }

    fn build(echo: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events, echo }), rx)
    }

    fn record(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

impl Listener for RecordingListener {
    fn on_open(&self, conn: &Connection) {
        assert!(conn.is_open());
        self.record(Event::Open(conn.id()));
    }

    fn on_message(&self, conn: &Connection, message: &str) {
        self.record(Event::Message(message.to_string()));
        if self.echo {
            let _ = conn.send_message(message);
        }
    }

    fn on_close(&self, _conn: &Connection, code: u16, reason: &str, remote: bool) {
        self.record(Event::Close {
            code,
            reason: reason.to_string(),
            remote,
        });
    }

    fn on_error(&self, _conn: Option<&Connection>, error: &Error) {
        self.record(Event::Error(error.to_string()));
    }
}

/// Next event, failing the test if none arrives in time.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("listener dropped")
}

/// Every event already delivered.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Minimal WebSocket client: masks outbound frames, reads unmasked ones.
pub struct Client<S> {
    pub stream: S,
    buffer: BytesMut,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_buffer(stream, BytesMut::new())
    }

    pub fn with_buffer(stream: S, buffer: BytesMut) -> Self {
        Self { stream, buffer }
    }

    pub async fn send(&mut self, frame: &Frame) {
        self.send_raw(&frame::encode_masked(frame, MASK)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Next server frame, or `None` once the server closed the stream.
    pub async fn recv(&mut self) -> Option<Frame> {
        timeout(WAIT, self.recv_inner())
            .await
            .expect("timed out waiting for frame")
    }

    async fn recv_inner(&mut self) -> Option<Frame> {
        loop {
            match frame::decode_unmasked(&self.buffer, usize::MAX) {
                ParseResult::Complete(frame, consumed) => {
                    self.buffer.advance(consumed);
                    return Some(frame);
                }
                ParseResult::Incomplete => match self.stream.read_buf(&mut self.buffer).await {
                    Ok(0) | Err(_) => return None,
                    Ok(_) => {}
                },
                ParseResult::Error(e) => panic!("server sent a bad frame: {e}"),
            }
        }
    }
}
