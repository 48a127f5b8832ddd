//! # risk — Risk Engine
//!
//! Last gate before any order leaves the daemon. Pure: no I/O and no clock,
//! time only enters through `now`.
//!
//! ## Rules (first violated wins)
//! 1. **Direction exclusivity** — never LONG and SHORT on one symbol
//! 2. **Position cap**          — at most N same-direction entries per symbol
//! 3. **Cooldown**              — no same-direction entry within the cooldown
//! 4. **Reversal protection**   — no opposite-direction entry within the window

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::models::{Direction, Position};

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskConfig {
    /// Same-direction entries allowed per symbol.
    pub max_positions_per_side: u32,
    /// Minimum gap between two same-direction entries on a symbol.
    pub cooldown:               Duration,
    /// Minimum gap before flipping direction on a symbol.
    pub reversal_window:        Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions_per_side: 3,
            cooldown:               Duration::minutes(5),
            reversal_window:        Duration::minutes(30),
        }
    }
}

// ─── Proposal / Decision ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ProposedTrade {
    pub symbol:    String,
    pub direction: Direction,
    pub score:     f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    OppositePositionOpen {
        symbol: String,
        open:   Direction,
    },
    PositionCap {
        symbol:    String,
        direction: Direction,
        open:      u32,
        max:       u32,
    },
    Cooldown {
        symbol:         String,
        direction:      Direction,
        remaining_secs: i64,
    },
    Reversal {
        symbol:         String,
        last:           Direction,
        remaining_secs: i64,
    },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::OppositePositionOpen { symbol, open } => {
                write!(f, "{symbol}: {open} position already open (no simultaneous LONG and SHORT)")
            }
            DenyReason::PositionCap { symbol, direction, open, max } => {
                write!(f, "{symbol}: {open}/{max} {direction} positions already open")
            }
            DenyReason::Cooldown { symbol, direction, remaining_secs } => {
                write!(f, "{symbol}: {direction} cooldown, {remaining_secs}s remaining")
            }
            DenyReason::Reversal { symbol, last, remaining_secs } => {
                write!(f, "{symbol}: reversal after {last} blocked, {remaining_secs}s remaining")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Allow,
    Deny(DenyReason),
}

// ─── Ledger ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub last_trade_at:  DateTime<Utc>,
    pub last_direction: Direction,
}

/// Per-symbol memory of the last accepted trade. Reconciliation never
/// touches it; only [`RiskEngine::record_execution`] does.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskLedger {
    entries: HashMap<String, LedgerEntry>,
}

impl RiskLedger {
    pub fn get(&self, symbol: &str) -> Option<&LedgerEntry> {
        self.entries.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn record(&mut self, symbol: &str, direction: Direction, at: DateTime<Utc>) {
        self.entries.insert(
            symbol.to_string(),
            LedgerEntry { last_trade_at: at, last_direction: direction },
        );
    }
}

// ─── Evaluation ───────────────────────────────────────────────────────────────

/// Deterministic: same inputs → same decision.
pub fn evaluate(
    trade:     &ProposedTrade,
    positions: &[Position],
    ledger:    &RiskLedger,
    config:    &RiskConfig,
    now:       DateTime<Utc>,
) -> RiskDecision {
    let symbol    = trade.symbol.as_str();
    let direction = trade.direction;

    // [1] Direction exclusivity
    if let Some(opposite) = positions.iter().find(|p| p.is(symbol, direction.opposite())) {
        return RiskDecision::Deny(DenyReason::OppositePositionOpen {
            symbol: symbol.to_string(),
            open:   opposite.direction,
        });
    }

    // [2] Position cap
    let open: u32 = positions
        .iter()
        .filter(|p| p.is(symbol, direction))
        .map(|p| p.entries.max(1))
        .sum();
    if open >= config.max_positions_per_side {
        return RiskDecision::Deny(DenyReason::PositionCap {
            symbol: symbol.to_string(),
            direction,
            open,
            max: config.max_positions_per_side,
        });
    }

    if let Some(last) = ledger.get(symbol) {
        let elapsed = now.signed_duration_since(last.last_trade_at);

        // [3] Cooldown (same direction)
        if last.last_direction == direction && elapsed < config.cooldown {
            return RiskDecision::Deny(DenyReason::Cooldown {
                symbol: symbol.to_string(),
                direction,
                remaining_secs: (config.cooldown - elapsed).num_seconds(),
            });
        }

        // [4] Reversal protection (opposite direction)
        if last.last_direction != direction && elapsed < config.reversal_window {
            return RiskDecision::Deny(DenyReason::Reversal {
                symbol: symbol.to_string(),
                last:   last.last_direction,
                remaining_secs: (config.reversal_window - elapsed).num_seconds(),
            });
        }
    }

    RiskDecision::Allow
}

// ─── Risk Engine ──────────────────────────────────────────────────────────────

/// Owns the ledger so nothing else can write it.
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: RiskConfig,
    ledger: RiskLedger,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config, ledger: RiskLedger::default() }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn ledger(&self) -> &RiskLedger {
        &self.ledger
    }

    pub fn evaluate(
        &self,
        trade:     &ProposedTrade,
        positions: &[Position],
        now:       DateTime<Utc>,
    ) -> RiskDecision {
        evaluate(trade, positions, &self.ledger, &self.config, now)
    }

    /// Call only after the trade was accepted AND executed.
    pub fn record_execution(&mut self, symbol: &str, direction: Direction, at: DateTime<Utc>) {
        self.ledger.record(symbol, direction, at);
        info!(symbol, %direction, at = %at, "🛡️ Risk ledger updated");
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
