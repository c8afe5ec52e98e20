//! Connection handle shared by the reader, the writer and the application.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::frame::MAX_CONTROL_PAYLOAD;
use crate::protocol::{close, Frame, Opcode};
use crate::session::state::{CloseOutcome, CloseState, Phase};

/// Wake-up signal from the session core to the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Signal {
    Running,
    /// Close handshake started; the peer gets a grace period.
    Closing,
    /// Transport is gone; stop without waiting.
    Abort,
}

pub(crate) struct Shared {
    id: u64,
    peer: SocketAddr,
    state: Mutex<CloseState>,
    outbound: mpsc::UnboundedSender<Frame>,
    signal: watch::Sender<Signal>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, CloseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn raise(&self, signal: Signal) {
        self.signal.send_if_modified(|current| {
            if signal > *current {
                *current = signal;
                true
            } else {
                false
            }
        });
    }
}

/// Handle to one WebSocket session.
///
/// Cheap to clone and safe to use from any thread. Sends only enqueue; the
/// session's writer task performs the socket writes in enqueue order.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        peer: SocketAddr,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>, watch::Receiver<Signal>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (signal, signal_rx) = watch::channel(Signal::Running);
        let shared = Arc::new(Shared {
            id,
            peer,
            state: Mutex::new(CloseState::new()),
            outbound,
            signal,
        });
        (Self { shared }, rx, signal_rx)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn phase(&self) -> Phase {
        self.shared.state().phase
    }

    /// True only while active and no CLOSE was sent or received.
    pub fn is_open(&self) -> bool {
        self.shared.state().is_open()
    }

    /// Queue a TEXT message.
    pub fn send_message(&self, text: &str) -> Result<()> {
        self.send_frame(Frame::text(text))
    }

    /// Queue a BINARY message.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_frame(Frame::binary(data))
    }

    /// Queue an arbitrary frame.
    ///
    /// A CLOSE frame is routed through [`Connection::close`] so the close
    /// handshake stays consistent. Control frames must be final and carry at
    /// most 125 bytes; anything else is refused before it is queued.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        if frame.is_control() {
            if frame.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::ControlFrameTooLarge(frame.payload.len()).into());
            }
            if !frame.fin {
                return Err(ProtocolError::FragmentedControlFrame.into());
            }
        }

        if frame.opcode == Opcode::Close {
            let (code, reason) = frame.close_payload();
            self.close(code, &reason);
            return Ok(());
        }

        let state = self.shared.state();
        if !state.accepts_frames() {
            return Err(Error::ConnectionClosed);
        }
        self.shared
            .outbound
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Start the close handshake. Repeated calls are no-ops.
    ///
    /// 1005 and 1006 only describe a close locally and are sent as 1000.
    pub fn close(&self, code: u16, reason: &str) {
        let code = wire_code(code);
        {
            let mut state = self.shared.state();
            if state.is_closing() {
                return;
            }
            if state.begin_close(CloseOutcome::local(code, reason)) {
                let _ = self.shared.outbound.send(Frame::close(code, reason));
            }
        }
        debug!(conn_id = self.id(), peer = %self.peer_addr(), code, reason, "Closing connection");
        self.shared.raise(Signal::Closing);
    }

    pub(crate) fn activate(&self) {
        self.shared.state().activate();
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.shared.state().is_closing()
    }

    /// Close because of a fault on our side of the stream, queueing a CLOSE
    /// frame unless one is already queued.
    pub(crate) fn fail(&self, code: u16, reason: &str) {
        let code = wire_code(code);
        {
            let mut state = self.shared.state();
            if state.begin_close(CloseOutcome::local(code, reason)) {
                let _ = self.shared.outbound.send(Frame::close(code, reason));
            }
        }
        self.shared.raise(Signal::Closing);
    }

    /// Handle the peer's CLOSE: echo its code (1000 if none) unless we
    /// already queued our own CLOSE.
    pub(crate) fn receive_close(&self, code: u16, reason: String) {
        {
            let mut state = self.shared.state();
            if state.receive_close(CloseOutcome::remote(code, reason)) {
                let _ = self.shared.outbound.send(Frame::close(wire_code(code), ""));
            }
        }
        self.shared.raise(Signal::Closing);
    }

    /// Queue a control reply unless our CLOSE is already queued.
    pub(crate) fn reply(&self, frame: Frame) {
        let state = self.shared.state();
        if !state.close_queued {
            let _ = self.shared.outbound.send(frame);
        }
    }

    /// Close without a CLOSE frame because the transport is unusable.
    pub(crate) fn abort(&self, outcome: CloseOutcome, immediate: bool) {
        self.shared.state().abort(outcome);
        self.shared.raise(if immediate {
            Signal::Abort
        } else {
            Signal::Closing
        });
    }

    /// Record that the writer put our CLOSE on the wire.
    pub(crate) fn mark_close_sent(&self) -> bool {
        let mut state = self.shared.state();
        state.mark_close_sent();
        state.handshake_complete()
    }

    pub(crate) fn finish_reading(&self) {
        self.shared.state().reader_done = true;
    }

    pub(crate) fn reader_done(&self) -> bool {
        self.shared.state().reader_done
    }

    /// Closing -> Closed. Yields the `on_close` outcome exactly once.
    pub(crate) fn finish(&self) -> Option<CloseOutcome> {
        self.shared.state().finish()
    }
}

/// Codes that must not appear in a CLOSE frame are replaced by 1000.
fn wire_code(code: u16) -> u16 {
    match code {
        close::NO_STATUS | close::ABNORMAL => close::NORMAL,
        code => code,
    }
}
