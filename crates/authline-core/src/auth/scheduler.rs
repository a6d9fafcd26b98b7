//! Single-shot deadline for the silent token refresh.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Refresh this many seconds before the access token expires
pub const REFRESH_LEAD_SECS: i64 = 60;

/// Never schedule a refresh sooner than this, so very short-lived tokens
/// cannot cause a refresh storm
pub const MIN_REFRESH_DELAY_SECS: i64 = 10;

/// Delay until the refresh for a token living `expires_in_secs`.
/// `None` for tokens that do not expire.
pub fn refresh_delay(expires_in_secs: i64) -> Option<Duration> {
    if expires_in_secs <= 0 {
        return None;
    }
    let secs = (expires_in_secs - REFRESH_LEAD_SECS).max(MIN_REFRESH_DELAY_SECS);
    Some(Duration::from_secs(secs as u64))
}

/// Message sent when an armed deadline elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDue {
    pub generation: u64,
}

/// At most one armed deadline at a time. Each arm gets a new generation, so
/// a fire that raced a disarm is recognised as stale by [`accept`].
///
/// [`accept`]: RefreshScheduler::accept
pub struct RefreshScheduler<M> {
    tx: mpsc::UnboundedSender<M>,
    pending: Option<JoinHandle<()>>,
    generation: u64,
}

impl<M> RefreshScheduler<M>
where
    M: From<RefreshDue> + Send + 'static,
{
    pub fn new(tx: mpsc::UnboundedSender<M>) -> Self {
        Self {
            tx,
            pending: None,
            generation: 0,
        }
    }

    /// Disarm any pending deadline, then arm one for a token living
    /// `expires_in_secs`. Returns the delay, or `None` if nothing was armed.
    pub fn arm(&mut self, expires_in_secs: i64) -> Option<Duration> {
        self.disarm();

        let Some(delay) = refresh_delay(expires_in_secs) else {
            debug!(expires_in_secs, "Token does not expire, no refresh scheduled");
            return None;
        };

        let generation = self.generation;
        let tx = self.tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(M::from(RefreshDue { generation }));
        }));

        info!(refresh_in_secs = delay.as_secs(), "Scheduling token refresh");
        Some(delay)
    }

    pub fn disarm(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Consume a fire. True only for the deadline currently armed, and only once.
    pub fn accept(&mut self, due: RefreshDue) -> bool {
        if due.generation != self.generation || self.pending.is_none() {
            debug!(fired = due.generation, current = self.generation, "Ignoring stale refresh deadline");
            return false;
        }
        self.pending = None;
        self.generation = self.generation.wrapping_add(1);
        true
    }
}

impl<M> Drop for RefreshScheduler<M> {
    fn drop(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}
