//! # models::status
//!
//! [`DaemonStatus`] — the snapshot the controller polls. It is a value, not a
//! queue: every write replaces the previous one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::LifecycleState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid:              u32,
    pub running:          bool,
    pub state:            LifecycleState,
    /// Heartbeat. A controller treats ≥15s without change as a frozen daemon.
    pub last_update:      DateTime<Utc>,
    pub simulation_mode:  bool,
    pub position_count:   usize,
    pub last_command:     Option<String>,
    pub last_error:       Option<String>,
    pub public_endpoint:  String,
    pub private_endpoint: String,
    pub testnet:          bool,
}

impl DaemonStatus {
    /// Age of the snapshot relative to `now`.
    pub fn staleness(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_update)
    }
}
