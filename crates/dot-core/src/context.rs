use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Why a [`JobContext`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The deadline passed.
    Timeout,
    /// The context (or one of its parents) was cancelled.
    Canceled,
}

/// Cancellation token plus optional deadline, handed to every job.
///
/// Children observe their parent's cancellation but not the other way round.
#[derive(Debug, Clone)]
pub struct JobContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for JobContext {
    fn default() -> Self {
        Self::background()
    }
}

impl JobContext {
    /// Root context: never times out, cancelled only explicitly.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context sharing this context's deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context that also expires after `timeout`; never later than the parent.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context has already ended, and why.
    pub fn interrupted(&self) -> Option<Interrupt> {
        if self.token.is_cancelled() {
            return Some(Interrupt::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(Interrupt::Timeout),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Interrupt::Canceled,
                _ = sleep_until(deadline) => Interrupt::Timeout,
            },
            None => {
                self.token.cancelled().await;
                Interrupt::Canceled
            }
        }
    }
}
