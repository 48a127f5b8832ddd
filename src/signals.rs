//! # signals — File protocol with the controller
//!
//! ```text
//! <base>/signals/command.txt   controller → daemon, single slot, consumed on read
//! <base>/signals/status.json  daemon → controller, replaced atomically
//! <base>/data/positions.json  daemon-private position mirror
//! ```
//!
//! The command file is claimed by renaming it before it is read, so a command
//! the controller writes while the daemon is reading lands in a fresh slot
//! instead of being deleted unseen.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::DaemonError;
use crate::models::DaemonStatus;

pub const SIGNALS_DIR: &str = "signals";
pub const DATA_DIR: &str = "data";
pub const COMMAND_FILE: &str = "command.txt";
pub const STATUS_FILE: &str = "status.json";
pub const POSITIONS_FILE: &str = "positions.json";

/// Resolved locations of every file the daemon touches.
#[derive(Debug, Clone)]
pub struct SignalPaths {
    pub signals_dir: PathBuf,
    pub data_dir:    PathBuf,
    pub command:     PathBuf,
    pub status:      PathBuf,
    pub positions:   PathBuf,
}

impl SignalPaths {
    pub fn under(base: &Path) -> Self {
        let signals_dir = base.join(SIGNALS_DIR);
        let data_dir = base.join(DATA_DIR);
        Self {
            command:   signals_dir.join(COMMAND_FILE),
            status:    signals_dir.join(STATUS_FILE),
            positions: data_dir.join(POSITIONS_FILE),
            signals_dir,
            data_dir,
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), DaemonError> {
        for dir in [&self.signals_dir, &self.data_dir] {
            fs::create_dir_all(dir)
                .map_err(|source| DaemonError::SignalDir { path: dir.clone(), source })?;
        }
        Ok(())
    }
}

/// Write via a sibling temp file and rename, so readers only ever see the
/// previous complete file or the new complete file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

// ─── Command inbox ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CommandInbox {
    path:    PathBuf,
    claimed: PathBuf,
}

impl CommandInbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut claimed = path.clone().into_os_string();
        claimed.push(".claimed");
        Self { path, claimed: PathBuf::from(claimed) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop a claim left behind by a crash mid-read. Replaying it could repeat
    /// an order, so it is discarded rather than processed.
    pub fn discard_stale_claim(&self) {
        match fs::remove_file(&self.claimed) {
            Ok(()) => warn!(path = %self.claimed.display(), "Discarded stale claimed command"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.claimed.display(), error = %e, "Cannot remove stale claim"),
        }
    }

    /// Claim, read and clear the pending command. `None` when the slot is
    /// absent or blank. The file is gone before the caller sees its content.
    pub fn take(&self) -> Result<Option<String>, DaemonError> {
        match fs::rename(&self.path, &self.claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(DaemonError::CommandRead { path: self.path.clone(), source }),
        }

        let read = fs::read(&self.claimed);
        if let Err(e) = fs::remove_file(&self.claimed) {
            warn!(path = %self.claimed.display(), error = %e, "Cannot remove claimed command");
        }
        let bytes = read.map_err(|source| DaemonError::CommandRead {
            path: self.claimed.clone(),
            source,
        })?;

        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            debug!("Empty command file ignored");
            return Ok(None);
        }
        Ok(Some(text))
    }

    /// Controller side: drop a command into the slot.
    pub fn submit(&self, body: &str) -> io::Result<()> {
        write_atomic(&self.path, body.as_bytes())
    }
}

// ─── Status sink ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StatusSink {
    path: PathBuf,
}

impl StatusSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, status: &DaemonStatus) -> Result<(), DaemonError> {
        let body = serde_json::to_vec_pretty(status)?;
        write_atomic(&self.path, &body).map_err(|source| DaemonError::StatusWrite {
            path: self.path.clone(),
            source,
        })
    }

    /// Controller side: last snapshot, if any.
    pub fn read(&self) -> Option<DaemonStatus> {
        let raw = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }
}
