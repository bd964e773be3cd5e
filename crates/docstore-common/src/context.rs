//! Per-operation deadline and cancellation.
//!
//! Every store operation runs under a [`Context`]. The caller owns it: dropping
//! the operation future, cancelling the token, or letting the deadline pass all
//! stop the driver call.

use crate::{DocStoreError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline plus cancellation token governing one or more operations
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// Context cancelled whenever `token` is
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            deadline: None,
            token,
        }
    }

    /// Tighten the deadline. A later deadline than the current one is ignored.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Derive a context that is cancelled with this one but can also be cancelled alone
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn get_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Drive `operation` to completion unless the context is cancelled or expires first.
    ///
    /// `name` only labels the resulting `Timeout` / `Cancelled` error.
    pub async fn run<T, F>(&self, name: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(DocStoreError::Cancelled(name.to_string()));
        }

        match self.deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return Err(DocStoreError::Timeout(format!("{}: deadline exceeded", name)));
                }
                tokio::select! {
                    _ = self.token.cancelled() => Err(DocStoreError::Cancelled(name.to_string())),
                    result = tokio::time::timeout_at(deadline, operation) => match result {
                        Ok(inner) => inner,
                        Err(_) => Err(DocStoreError::Timeout(format!("{}: deadline exceeded", name))),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(DocStoreError::Cancelled(name.to_string())),
                    result = operation => result,
                }
            }
        }
    }
}
