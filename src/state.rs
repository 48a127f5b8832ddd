//! # state
//!
//! Lifecycle state machine and the daemon's own bookkeeping.
//!
//! ```text
//!   NOT_RUNNING ──start()──▶ IDLE ──START──▶ RUNNING
//!                              ▲               │
//!                              └─────STOP──────┘
//!
//!   any state ──SHUTDOWN──▶ TERMINATED   (no way out)
//! ```
//!
//! Transitions are pure so the allowed set can be tested without touching the
//! filesystem or the exchange.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Lifecycle ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    NotRunning,
    Idle,
    Running,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Daemon process finished booting.
    Boot,
    Start,
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from:       LifecycleState,
    pub transition: Transition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} not allowed from {}", self.transition, self.from)
    }
}

impl LifecycleState {
    /// Next state, or `Err` when the transition is not in the allowed set.
    /// Repeating START while RUNNING or STOP while IDLE is a no-op, not an error.
    pub fn apply(self, transition: Transition) -> Result<LifecycleState, InvalidTransition> {
        use LifecycleState::*;

        match (self, transition) {
            (Terminated, _)                     => Err(InvalidTransition { from: self, transition }),
            (_, Transition::Shutdown)           => Ok(Terminated),
            (NotRunning, Transition::Boot)      => Ok(Idle),
            (Idle | Running, Transition::Start) => Ok(Running),
            (Idle | Running, Transition::Stop)  => Ok(Idle),
            _ => Err(InvalidTransition { from: self, transition }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::NotRunning => "NOT_RUNNING",
            LifecycleState::Idle       => "IDLE",
            LifecycleState::Running    => "RUNNING",
            LifecycleState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Last Error ───────────────────────────────────────────────────────────────

/// Where the current `last_error` came from. A clean position sync clears only
/// sync errors so it never hides a rejected command from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    Command,
    Sync,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub origin:  ErrorOrigin,
    pub message: String,
}

// ─── DaemonState ──────────────────────────────────────────────────────────────

/// Everything the status snapshot reports that is not position data.
#[derive(Debug, Clone)]
pub struct DaemonState {
    pub lifecycle:    LifecycleState,
    pub last_command: Option<String>,
    pub last_error:   Option<LastError>,
    pub heartbeat_at: DateTime<Utc>,
    /// Command error hidden behind a later sync error; shown again once the
    /// sync recovers.
    superseded:       Option<LastError>,
}

impl DaemonState {
    pub fn new() -> Self {
        Self {
            lifecycle:    LifecycleState::NotRunning,
            last_command: None,
            last_error:   None,
            heartbeat_at: Utc::now(),
            superseded:   None,
        }
    }

    /// Apply a transition; an invalid one leaves the state untouched.
    pub fn transition(&mut self, transition: Transition) -> Result<LifecycleState, InvalidTransition> {
        let next = self.lifecycle.apply(transition)?;
        self.lifecycle = next;
        Ok(next)
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == LifecycleState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle == LifecycleState::Terminated
    }

    pub fn record_error(&mut self, origin: ErrorOrigin, message: impl Into<String>) {
        let previous = self.last_error.take();
        match origin {
            ErrorOrigin::Sync => {
                if let Some(prev) = previous.filter(|e| e.origin == ErrorOrigin::Command) {
                    self.superseded = Some(prev);
                }
            }
            ErrorOrigin::Command | ErrorOrigin::Fatal => self.superseded = None,
        }
        self.last_error = Some(LastError { origin, message: message.into() });
    }

    pub fn clear_error(&mut self, origin: ErrorOrigin) {
        if self.last_error.as_ref().map(|e| e.origin) == Some(origin) {
            self.last_error = match origin {
                ErrorOrigin::Sync => self.superseded.take(),
                _ => None,
            };
        }
        if origin == ErrorOrigin::Command {
            self.superseded = None;
        }
    }

    pub fn beat(&mut self, now: DateTime<Utc>) {
        self.heartbeat_at = now;
    }
}

impl Default for DaemonState {
    fn default() -> Self { Self::new() }
}
