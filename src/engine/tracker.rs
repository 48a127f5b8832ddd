//! # engine::tracker — Position Tracker
//!
//! Local mirror of the account's open positions, one row per
//! `(symbol, direction)`. The exchange is the source of truth: every sync
//! replaces the mirror wholesale, and order placement only touches it after
//! the exchange acknowledged the order.
//!
//! The mirror is saved to `data/positions.json` after every change so a
//! simulated book survives a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ExchangeError;
use crate::exchange::TradingClient;
use crate::models::{Direction, ExecutionReceipt, OrderRequest, Position};
use crate::signals::write_atomic;

// ─── Persistence ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means no positions; an unreadable one is logged and ignored.
    pub fn load(&self) -> Vec<Position> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read saved positions");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(positions) => positions,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt positions file");
                Vec::new()
            }
        }
    }

    pub fn save(&self, positions: &[Position]) -> std::io::Result<()> {
        let body = serde_json::to_vec_pretty(positions)?;
        write_atomic(&self.path, &body)
    }
}

// ─── Reports ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub count:   usize,
    pub added:   usize,
    pub removed: usize,
    pub resized: usize,
    /// Symbols the exchange reports open in both directions (hedge mode).
    pub hedged:  Vec<String>,
}

impl SyncReport {
    pub fn has_conflicts(&self) -> bool {
        self.added + self.removed + self.resized > 0 || !self.hedged.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CloseAllReport {
    pub closed: Vec<ExecutionReceipt>,
    pub failed: Vec<(String, ExchangeError)>,
}

impl CloseAllReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.failed.is_empty() {
            return format!("closed {} position(s)", self.closed.len());
        }
        let failures: Vec<String> = self
            .failed
            .iter()
            .map(|(symbol, e)| format!("{symbol}: {e}"))
            .collect();
        format!(
            "closed {} position(s), {} failed ({})",
            self.closed.len(),
            self.failed.len(),
            failures.join("; ")
        )
    }
}

// ─── Tracker ──────────────────────────────────────────────────────────────────

pub struct PositionTracker {
    trading:       Arc<dyn TradingClient>,
    store:         PositionStore,
    positions:     Vec<Position>,
    sync_interval: Duration,
    last_sync:     Option<Instant>,
}

impl PositionTracker {
    pub fn new(
        trading:       Arc<dyn TradingClient>,
        store:         PositionStore,
        sync_interval: Duration,
        restored:      Vec<Position>,
    ) -> Self {
        Self {
            trading,
            store,
            positions: restored,
            sync_interval,
            last_sync: None,
        }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn count(&self) -> usize {
        self.positions.len()
    }

    pub fn sync_due(&self, now: Instant) -> bool {
        match self.last_sync {
            None => true,
            Some(at) => now.duration_since(at) >= self.sync_interval,
        }
    }

    /// Make the next [`sync_due`](Self::sync_due) check pass immediately.
    pub fn request_sync(&mut self) {
        self.last_sync = None;
    }

    /// Replace the mirror with the exchange's view. On failure the mirror is
    /// left as it was and the next attempt waits a full interval.
    pub async fn sync(&mut self) -> Result<SyncReport, ExchangeError> {
        self.last_sync = Some(Instant::now());

        let mut remote = self.trading.list_positions().await?;
        for pos in remote.iter_mut() {
            // Entry counts are local knowledge; keep them across syncs.
            if let Some(local) = self.find(&pos.symbol, pos.direction) {
                pos.entries = local.entries.max(1);
            }
        }

        let report = reconcile(&self.positions, &remote);
        if report.has_conflicts() {
            info!(
                added   = report.added,
                removed = report.removed,
                resized = report.resized,
                "🔄 Exchange view differs from local mirror — exchange wins"
            );
        }
        for symbol in &report.hedged {
            warn!(symbol = %symbol, "Exchange reports LONG and SHORT open on one symbol");
        }

        let changed = remote != self.positions;
        self.positions = remote;
        if changed {
            self.persist();
        }
        debug!(count = report.count, "Positions synced");
        Ok(report)
    }

    /// Place `order` and fold the fill into the mirror. A failed order leaves
    /// the mirror untouched.
    pub async fn execute(&mut self, order: &OrderRequest) -> Result<ExecutionReceipt, ExchangeError> {
        let receipt = self.trading.place_order(order).await?;

        match self
            .positions
            .iter_mut()
            .find(|p| p.is(&order.symbol, order.direction))
        {
            Some(pos) => pos.absorb(order, &receipt),
            None => self.positions.push(Position::from_fill(order, &receipt)),
        }
        self.persist();

        info!(
            order_id  = %receipt.order_id,
            symbol    = %order.symbol,
            direction = %order.direction,
            size      = %receipt.size,
            price     = %receipt.price,
            simulated = receipt.simulated,
            endpoint  = self.trading.endpoint(),
            "✅ Position opened"
        );
        Ok(receipt)
    }

    /// Close every tracked position. Failures do not stop the rest; the ones
    /// that failed stay in the mirror.
    pub async fn close_all(&mut self) -> CloseAllReport {
        let mut report = CloseAllReport::default();
        let snapshot = self.positions.clone();

        for pos in &snapshot {
            match self.trading.close_position(pos).await {
                Ok(receipt) => {
                    self.positions.retain(|p| !p.is(&pos.symbol, pos.direction));
                    info!(symbol = %pos.symbol, direction = %pos.direction, "Position closed");
                    report.closed.push(receipt);
                }
                Err(e) => {
                    warn!(symbol = %pos.symbol, error = %e, "⛔ Close failed");
                    report.failed.push((pos.symbol.clone(), e));
                }
            }
        }

        if !report.closed.is_empty() {
            self.persist();
        }
        report
    }

    fn find(&self, symbol: &str, direction: Direction) -> Option<&Position> {
        self.positions.iter().find(|p| p.is(symbol, direction))
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.positions) {
            warn!(path = %self.store.path().display(), error = %e, "Cannot save positions");
        }
    }
}

/// Diff the local mirror against the exchange's rows.
fn reconcile(local: &[Position], remote: &[Position]) -> SyncReport {
    let mut report = SyncReport { count: remote.len(), ..SyncReport::default() };

    for r in remote {
        match local.iter().find(|l| l.is(&r.symbol, r.direction)) {
            None => report.added += 1,
            Some(l) if l.size != r.size => report.resized += 1,
            Some(_) => {}
        }
        let opposite = r.direction.opposite();
        if r.direction == Direction::Long && remote.iter().any(|o| o.is(&r.symbol, opposite)) {
            report.hedged.push(r.symbol.clone());
        }
    }
    report.removed = local
        .iter()
        .filter(|l| !remote.iter().any(|r| r.is(&l.symbol, l.direction)))
        .count();

    report
}
