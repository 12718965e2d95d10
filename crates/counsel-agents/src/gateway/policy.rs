//! Timeouts, retries and cancellation for gateway calls.
//!
//! Every external call goes through [`CallPolicy::run`]: it is bounded by the
//! timeout of its [`CallKind`], raced against the build's cancellation token,
//! and retried with exponential backoff while the failure is retriable.
//! Streams are not retried once consumed; callers bound stream reads with
//! [`CallPolicy::timeout_for`] themselves.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{RetryConfig, TimeoutConfig};
use crate::errors::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Triage,
    Stage,
    Generation,
    Search,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Triage => write!(f, "triage"),
            Self::Stage => write!(f, "stage"),
            Self::Generation => write!(f, "generation"),
            Self::Search => write!(f, "search"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallPolicy {
    timeouts: TimeoutConfig,
    retry: RetryConfig,
}

impl CallPolicy {
    pub fn new(timeouts: TimeoutConfig, retry: RetryConfig) -> Self {
        Self { timeouts, retry }
    }

    pub fn timeout_for(&self, kind: CallKind) -> Duration {
        match kind {
            CallKind::Triage => self.timeouts.triage(),
            CallKind::Stage => self.timeouts.stage(),
            CallKind::Generation => self.timeouts.generation(),
            CallKind::Search => self.timeouts.search(),
        }
    }

    /// Run `call` once, bounded by the kind's timeout and `cancel`.
    pub async fn once<T, Fut>(
        &self,
        kind: CallKind,
        cancel: &CancellationToken,
        call: Fut,
    ) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let limit = self.timeout_for(kind);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            res = tokio::time::timeout(limit, call) => match res {
                Ok(inner) => inner,
                Err(_) => Err(GatewayError::Timeout(limit)),
            },
        }
    }

    /// Run `make_call` with timeout, cancellation and retry.
    pub async fn run<T, F, Fut>(
        &self,
        kind: CallKind,
        cancel: &CancellationToken,
        mut make_call: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match self.once(kind, cancel, make_call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < self.retry.max_retries => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        kind = %kind,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retriable gateway error, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
