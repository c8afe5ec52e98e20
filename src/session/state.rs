//! Per-session lifecycle state.
//!
//! One `CloseState` lives behind the session's mutex. The reader, the writer
//! and any thread holding a `Connection` move it forward; nothing moves it
//! back.

use crate::protocol::close;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Handshake done, `on_open` not yet delivered.
    Open,
    /// Traffic flows both ways.
    Active,
    /// A CLOSE was queued or received, or the transport failed.
    Closing,
    /// Socket released and `on_close` delivered.
    Closed,
}

/// How a session ended, as reported to `on_close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub code: u16,
    pub reason: String,
    pub remote: bool,
}

impl CloseOutcome {
    pub fn local(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            remote: false,
        }
    }

    pub fn remote(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            remote: true,
        }
    }
}

/// Close-handshake progress.
#[derive(Debug)]
pub(crate) struct CloseState {
    pub phase: Phase,
    /// A CLOSE frame sits in (or has left) the outbound queue.
    pub close_queued: bool,
    /// The writer has put our CLOSE frame on the wire.
    pub close_sent: bool,
    /// The peer's CLOSE frame has been read.
    pub close_received: bool,
    /// The reader task has exited.
    pub reader_done: bool,
    outcome: Option<CloseOutcome>,
}

impl CloseState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Open,
            close_queued: false,
            close_sent: false,
            close_received: false,
            reader_done: false,
            outcome: None,
        }
    }

    /// Open -> Active.
    pub fn activate(&mut self) {
        if self.phase == Phase::Open {
            self.phase = Phase::Active;
        }
    }

    /// Active with no close in progress in either direction.
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Active
            && !self.close_queued
            && !self.close_sent
            && !self.close_received
    }

    /// Whether new frames may still be queued behind existing ones.
    pub fn accepts_frames(&self) -> bool {
        matches!(self.phase, Phase::Open | Phase::Active) && !self.close_queued
    }

    pub fn is_closing(&self) -> bool {
        matches!(self.phase, Phase::Closing | Phase::Closed)
    }

    /// Move to Closing, recording `outcome` if no cause was recorded yet.
    ///
    /// Returns true when the caller must queue a CLOSE frame; this happens
    /// at most once per session.
    pub fn begin_close(&mut self, outcome: CloseOutcome) -> bool {
        if self.phase == Phase::Closed {
            return false;
        }
        self.phase = Phase::Closing;
        self.outcome.get_or_insert(outcome);

        if self.close_queued {
            false
        } else {
            self.close_queued = true;
            true
        }
    }

    /// Record the peer's CLOSE. Returns true when an echo must be queued.
    pub fn receive_close(&mut self, outcome: CloseOutcome) -> bool {
        self.close_received = true;
        self.begin_close(outcome)
    }

    /// Move to Closing without sending a CLOSE frame (transport failure).
    pub fn abort(&mut self, outcome: CloseOutcome) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closing;
        self.outcome.get_or_insert(outcome);
    }

    /// Record that our CLOSE frame was written.
    pub fn mark_close_sent(&mut self) {
        self.close_sent = true;
    }

    /// Both CLOSE frames have crossed the wire.
    pub fn handshake_complete(&self) -> bool {
        self.close_sent && self.close_received
    }

    /// Closing -> Closed. Yields the outcome for `on_close` exactly once.
    pub fn finish(&mut self) -> Option<CloseOutcome> {
        if self.phase == Phase::Closed {
            return None;
        }
        self.phase = Phase::Closed;
        Some(self.outcome.take().unwrap_or_else(|| {
            CloseOutcome::local(close::ABNORMAL, "Connection closed abnormally")
        }))
    }
}
