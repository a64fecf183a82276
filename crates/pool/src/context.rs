//! Cancellation and deadline context for acquisition calls.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::PoolError;

/// Cancellation token plus optional deadline carried into acquisition.
///
/// Cloning shares the token: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct AcquireContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl AcquireContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now. A timeout too large to
    /// represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// A context tied to an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), PoolError> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PoolError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early with an error on cancellation or
    /// when the deadline passes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), PoolError> {
        let (duration, hits_deadline) = match self.remaining() {
            Some(left) if left < duration => (left, true),
            _ => (duration, false),
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(PoolError::Cancelled),
            _ = tokio::time::sleep(duration) => {
                if hits_deadline {
                    Err(PoolError::DeadlineExceeded)
                } else {
                    Ok(())
                }
            }
        }
    }
}
