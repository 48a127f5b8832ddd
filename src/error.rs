//! # error
//!
//! Error taxonomy for the daemon.
//!
//! Only [`DaemonError`] is allowed to end the process. Everything else is
//! recorded in the status snapshot's `last_error` and the loop keeps polling:
//!
//! | Type            | Class                          | Effect on the daemon          |
//! |-----------------|--------------------------------|-------------------------------|
//! | `ClientError`   | configuration (startup)        | fall back to simulation mode  |
//! | `ExchangeError` | transient / authentication     | logged, retried next tick     |
//! | `CommandError`  | validation / risk denial       | rejected, state unchanged     |
//! | `DaemonError`   | fatal filesystem failure       | final status write, exit      |

use std::path::PathBuf;

use thiserror::Error;

use crate::risk::DenyReason;

// ─── Client construction ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClientError {
    /// The resolved endpoint needs credentials that are not configured.
    #[error("Trading credentials missing: set {key_env} and {secret_env}")]
    CredentialsMissing {
        key_env:    &'static str,
        secret_env: &'static str,
    },

    #[error("HTTP client build failed: {0}")]
    Http(#[from] reqwest::Error),
}

// ─── Exchange collaborator ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("Exchange timeout: {0}")]
    Timeout(String),

    #[error("Exchange unreachable: {0}")]
    Network(String),

    #[error("Exchange rate limit hit: {0}")]
    RateLimited(String),

    /// Bad or mismatched credentials for the resolved endpoint. Terminal for the
    /// command that hit it, never for the daemon.
    #[error("Authentication failed at {endpoint} (key {key_prefix}): {message}")]
    Authentication {
        endpoint:   String,
        key_prefix: String,
        message:    String,
    },

    #[error("Exchange rejected request: retCode={code} {message}")]
    Rejected { code: i64, message: String },

    #[error("Exchange response decode error: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// Transient failures are retried on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout(_) | ExchangeError::Network(_) | ExchangeError::RateLimited(_)
        )
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, ExchangeError::Authentication { .. })
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}

// ─── Command validation ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Command has no ACTION field")]
    MissingAction,

    #[error("Unknown ACTION '{0}'")]
    UnknownAction(String),

    #[error("{action} requires field {field}")]
    MissingField {
        action: &'static str,
        field:  &'static str,
    },

    #[error("Malformed line '{0}' (expected KEY=VALUE)")]
    MalformedLine(String),

    #[error("SCORE '{0}' is not a number")]
    InvalidScore(String),

    #[error("SCORE {score} outside allowed range [{min}, {max}]")]
    ScoreOutOfRange { score: f64, min: f64, max: f64 },

    #[error("PAIR '{0}' is not a valid symbol")]
    InvalidPair(String),

    #[error("{0} ignored: daemon is not RUNNING (send START first)")]
    NotRunning(&'static str),

    #[error("Risk denied: {0}")]
    RiskDenied(DenyReason),

    #[error("Transition rejected: {0}")]
    Lifecycle(String),

    #[error("Order size {size} for {symbol} below exchange minimum {min_qty}")]
    SizeBelowMinimum {
        symbol:  String,
        size:    String,
        min_qty: String,
    },
}

// ─── Trade path ───────────────────────────────────────────────────────────────

/// Anything that can stop a BUY/SELL between validation and the exchange ack.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// CLOSE_ALL where at least one close failed; the rest went through.
    #[error("Close-all incomplete: {0}")]
    PartialClose(String),
}

// ─── Fatal ────────────────────────────────────────────────────────────────────

/// Unrecoverable failures on the daemon's own files.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Cannot write status file {path}: {source}")]
    StatusWrite {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot read command file {path}: {source}")]
    CommandRead {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot prepare signal directory {path}: {source}")]
    SignalDir {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("Exchange client setup failed: {0}")]
    Client(#[from] ClientError),

    #[error("Status serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
