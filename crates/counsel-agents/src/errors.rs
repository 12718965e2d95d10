//! Error taxonomy with retry classification.
//!
//! Every failure in the agents layer is one of the enums below. Callers ask
//! `retry_category()` instead of string matching.
//!
//! | Category     | Retriable | Source                                   |
//! |--------------|-----------|------------------------------------------|
//! | Transient    | yes       | network, 5xx, timeout, database          |
//! | RateLimit    | yes       | HTTP 429                                 |
//! | ParseFailure | no        | model or API output failed to decode     |
//! | Rejected     | no        | 4xx, bad configuration                   |
//! | Cancelled    | no        | the speculative build was abandoned      |

use std::fmt;
use std::time::Duration;

use counsel_coordination::escalation::SentinelError;
use counsel_coordination::session::SessionKeyError;
use counsel_coordination::Stage;
use thiserror::Error;

/// Classification used to decide whether a failed call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Network or backend hiccup, timeout included.
    Transient,
    /// Provider rate limit; retry with backoff.
    RateLimit,
    /// Output could not be decoded.
    ParseFailure,
    /// The request itself was refused.
    Rejected,
    /// Caller abandoned the call.
    Cancelled,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::ParseFailure => write!(f, "parse_failure"),
            Self::Rejected => write!(f, "rejected"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure of one external call.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Http(_) | Self::Timeout(_) | Self::Database(_) => RetryCategory::Transient,
            Self::Status { status: 429, .. } => RetryCategory::RateLimit,
            Self::Status { status, .. } if *status >= 500 => RetryCategory::Transient,
            Self::Status { .. } | Self::Configuration(_) => RetryCategory::Rejected,
            Self::Decode(_) => RetryCategory::ParseFailure,
            Self::Cancelled => RetryCategory::Cancelled,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<tokio_postgres::Error> for GatewayError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Failure of the triage classifier. Always fatal for the turn.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("Triage gateway failure: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Triage output: {0}")]
    Sentinel(#[from] SentinelError),
}

/// Failure inside a deep-build stage.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Stage {stage} gateway failure: {source}")]
    Gateway {
        stage: Stage,
        #[source]
        source: GatewayError,
    },

    #[error("Stage {stage} returned unparsable output: {message}")]
    Parse { stage: Stage, message: String },

    #[error("Stage {stage} cancelled")]
    Cancelled { stage: Stage },

    #[error("Generation requested before template, strategy and precedent were cached")]
    NotPrepared,
}

impl BuildError {
    pub fn gateway(stage: Stage, source: GatewayError) -> Self {
        match source {
            GatewayError::Cancelled => Self::Cancelled { stage },
            source => Self::Gateway { stage, source },
        }
    }

    pub fn parse(stage: Stage, message: impl Into<String>) -> Self {
        Self::Parse {
            stage,
            message: message.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Gateway { stage, .. } | Self::Parse { stage, .. } | Self::Cancelled { stage } => {
                *stage
            }
            Self::NotPrepared => Stage::Generate,
        }
    }

    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Gateway { source, .. } => source.retry_category(),
            Self::Parse { .. } => RetryCategory::ParseFailure,
            Self::Cancelled { .. } => RetryCategory::Cancelled,
            Self::NotPrepared => RetryCategory::Rejected,
        }
    }
}

/// Failure of a whole turn. Deep-build failures never surface here.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Invalid session key: {0}")]
    InvalidSessionKey(#[from] SessionKeyError),

    #[error(transparent)]
    Triage(#[from] TriageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_retriable() {
        let err = GatewayError::Status {
            status: 429,
            body: "slow down".into(),
        };
        assert_eq!(err.retry_category(), RetryCategory::RateLimit);
        assert!(err.is_retriable());
    }

    #[test]
    fn server_error_and_timeout_are_transient() {
        let err = GatewayError::Status {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.retry_category(), RetryCategory::Transient);
        assert!(GatewayError::Timeout(Duration::from_secs(1)).is_retriable());
    }

    #[test]
    fn client_error_and_decode_are_terminal() {
        let err = GatewayError::Status {
            status: 401,
            body: "bad key".into(),
        };
        assert!(!err.is_retriable());
        assert!(!GatewayError::Decode("eof".into()).is_retriable());
    }

    #[test]
    fn cancelled_gateway_maps_to_cancelled_build() {
        let err = BuildError::gateway(Stage::Template, GatewayError::Cancelled);
        assert!(matches!(err, BuildError::Cancelled { stage: Stage::Template }));
        assert_eq!(err.retry_category(), RetryCategory::Cancelled);
    }
}
