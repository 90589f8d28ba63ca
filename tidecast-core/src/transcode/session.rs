//! Transcoding session: lifecycle state machine and output channel.
//!
//! An engine owns the [`SessionHandle`] side and pushes events and output
//! chunks into it; the request owns the [`TranscodeSession`] side. Dropping
//! the session's output half cancels the handle's token, which every engine
//! task observes.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::progress::Progress;
use super::{TranscodeError, TranscodeResult};

/// Capacity of the lifecycle event channel.
const EVENT_BUFFER: usize = 32;

/// Slots held back from progress events so lifecycle events always fit.
const LIFECYCLE_RESERVE: usize = 2;

/// States of a single transcoding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Completed,
    Failed,
}

/// Lifecycle notifications emitted by an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The engine accepted its configuration and is consuming input.
    Started,
    /// Advisory progress; never drives control flow.
    Progress(Progress),
    /// Output was flushed and the engine exited cleanly.
    Completed,
    /// The engine, the input or a deadline failed the session.
    Failed { reason: String },
}

impl SessionState {
    /// Applies `event` and returns the resulting state.
    ///
    /// Terminal states absorb every event. Events that are not valid from the
    /// current state leave it unchanged.
    pub fn apply(self, event: &SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Starting, E::Started) => S::Running,
            (S::Running, E::Progress(_)) => S::Running,
            (S::Running, E::Completed) => S::Completed,
            (S::Starting | S::Running, E::Failed { .. }) => S::Failed,
            (state, event) => {
                if !state.is_terminal() {
                    debug!(?state, ?event, "Ignoring out-of-order session event");
                }
                state
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Opens the two halves of a session.
pub fn open(id: Uuid, output_buffer: usize) -> (SessionHandle, TranscodeSession) {
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (output_tx, output_rx) = mpsc::channel(output_buffer.max(1));
    let cancel = CancellationToken::new();

    let handle = SessionHandle {
        id,
        events: event_tx,
        output: output_tx,
        cancel: cancel.clone(),
    };

    let session = TranscodeSession {
        events: SessionEvents {
            id,
            state: SessionState::Starting,
            rx: event_rx,
        },
        output: SessionOutput {
            rx: output_rx,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        },
    };

    (handle, session)
}

/// Engine-side half of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    events: mpsc::Sender<SessionEvent>,
    output: mpsc::Sender<TranscodeResult<Bytes>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token cancelled when the client goes away or the session is cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Emits a lifecycle event. Never blocks.
    pub fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            warn!(session = %self.id, ?event, "Session event dropped, channel full");
        }
    }

    /// Emits progress if there is room left beyond the lifecycle reserve.
    pub fn progress(&self, progress: Progress) {
        if self.events.capacity() > LIFECYCLE_RESERVE {
            let _ = self.events.try_send(SessionEvent::Progress(progress));
        }
    }

    /// Sends one output chunk, waiting while the client is behind.
    ///
    /// Returns `false` once the session is cancelled or the client is gone;
    /// the caller should stop producing.
    pub async fn send_chunk(&self, chunk: Bytes) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.output.send(Ok(chunk)) => {
                if sent.is_err() {
                    self.cancel.cancel();
                }
                sent.is_ok()
            }
        }
    }

    /// Terminates the output stream with an error.
    pub async fn fail_output(&self, reason: &str) {
        let error = TranscodeError::Failed {
            reason: reason.to_string(),
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = self.output.send(Err(error)) => {}
        }
    }
}

/// Request-side half of a session.
#[derive(Debug)]
pub struct TranscodeSession {
    events: SessionEvents,
    output: SessionOutput,
}

impl TranscodeSession {
    pub fn id(&self) -> Uuid {
        self.events.id
    }

    /// Waits for the next lifecycle event; `None` once the engine is done.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.next_event().await
    }

    /// Waits for the next output chunk; `None` at end of output.
    pub async fn next_chunk(&mut self) -> Option<TranscodeResult<Bytes>> {
        self.output.next_chunk().await
    }

    pub fn state(&self) -> SessionState {
        self.events.state
    }

    /// Stops the engine and releases the input.
    pub fn cancel(&self) {
        self.output.cancel();
    }

    /// Splits the session so events and output can be consumed independently.
    pub fn into_parts(self) -> (SessionEvents, SessionOutput) {
        (self.events, self.output)
    }
}

/// Lifecycle half of a [`TranscodeSession`].
#[derive(Debug)]
pub struct SessionEvents {
    id: Uuid,
    state: SessionState,
    rx: mpsc::Receiver<SessionEvent>,
}

impl SessionEvents {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.rx.recv().await?;
        self.state = self.state.apply(&event);
        Some(event)
    }
}

/// Output half of a [`TranscodeSession`]; cancels the session when dropped.
#[derive(Debug)]
pub struct SessionOutput {
    rx: mpsc::Receiver<TranscodeResult<Bytes>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl SessionOutput {
    pub async fn next_chunk(&mut self) -> Option<TranscodeResult<Bytes>> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for SessionOutput {
    type Item = TranscodeResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
