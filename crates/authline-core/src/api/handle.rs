//! Cancellable, single-outcome handles for dispatched requests.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ApiError, Reply};

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const DONE: u8 = 2;

/// Events emitted over the lifetime of one request
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// An attempt (1-indexed) is about to be made
    Attempt(u32),
    /// Terminal success
    Finished(Reply),
    /// Terminal failure, carrying the raw reply when one was received
    Failed(ApiError),
}

impl RequestEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestEvent::Attempt(_))
    }
}

/// Lifecycle shared between a handle and the task driving its request.
/// Moves once, from `PENDING` to either `CANCELLED` or `DONE`.
#[derive(Debug)]
struct Lifecycle {
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Lifecycle {
    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

/// Abort-only view of a request, usable while the handle itself is awaited
#[derive(Debug, Clone)]
pub struct AbortHandle {
    lifecycle: Arc<Lifecycle>,
}

impl AbortHandle {
    /// Suppress every future event of the request.
    /// A no-op once the terminal outcome has been emitted.
    pub fn abort(&self) {
        if self
            .lifecycle
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.lifecycle.cancel.cancel();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

/// One in-flight or completed request.
///
/// The handle is consumed by [`RequestHandle::outcome`], so it cannot be
/// observed again after its terminal outcome.
#[derive(Debug)]
pub struct RequestHandle {
    id: u64,
    abort: AbortHandle,
    events: mpsc::UnboundedReceiver<RequestEvent>,
}

impl RequestHandle {
    pub(crate) fn new(id: u64) -> (Self, Emitter) {
        let lifecycle = Arc::new(Lifecycle {
            state: AtomicU8::new(PENDING),
            cancel: CancellationToken::new(),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = Self {
            id,
            abort: AbortHandle {
                lifecycle: Arc::clone(&lifecycle),
            },
            events: rx,
        };
        (handle, Emitter { lifecycle, tx })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Next event, or `None` once the stream is over or the request was aborted
    pub async fn next_event(&mut self) -> Option<RequestEvent> {
        if self.is_aborted() {
            return None;
        }

        let event = tokio::select! {
            event = self.events.recv() => event,
            _ = self.abort.lifecycle.cancel.cancelled() => None,
        };

        if self.is_aborted() {
            return None;
        }
        event
    }

    /// Wait for the terminal outcome, disposing of the handle.
    /// Returns `None` if the request was aborted first.
    pub async fn outcome(mut self) -> Option<Result<Reply, ApiError>> {
        while let Some(event) = self.next_event().await {
            match event {
                RequestEvent::Attempt(_) => {}
                RequestEvent::Finished(reply) => return Some(Ok(reply)),
                RequestEvent::Failed(err) => return Some(Err(err)),
            }
        }
        None
    }
}

/// Sending side held by the task that drives a request
#[derive(Debug)]
pub(crate) struct Emitter {
    lifecycle: Arc<Lifecycle>,
    tx: mpsc::UnboundedSender<RequestEvent>,
}

impl Emitter {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    /// Resolves when the handle is aborted
    pub(crate) async fn cancelled(&self) {
        self.lifecycle.cancel.cancelled().await
    }

    pub(crate) fn attempt(&self, attempt: u32) {
        if !self.is_cancelled() {
            // The handle may already be dropped; nobody is listening then
            let _ = self.tx.send(RequestEvent::Attempt(attempt));
        }
    }

    /// Emit the single terminal outcome. Returns false if the request was aborted.
    pub(crate) fn finish(self, result: Result<Reply, ApiError>) -> bool {
        if self
            .lifecycle
            .state
            .compare_exchange(PENDING, DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let event = match result {
            Ok(reply) => RequestEvent::Finished(reply),
            Err(err) => RequestEvent::Failed(err),
        };
        let _ = self.tx.send(event);
        true
    }
}
