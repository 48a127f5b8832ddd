//! # models::position
//!
//! [`Position`] = one open exposure as the daemon believes it to be.
//!
//! Owned by the Position Tracker. A row changes only when the exchange's
//! authoritative list replaces it (reconciliation) or when an execution
//! receipt lands for the same `(symbol, direction)` pair.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::order::{ExecutionReceipt, OrderRequest};

// ─── Direction ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long  => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Order side that opens exposure in this direction (Bybit spelling).
    pub fn open_side(self) -> &'static str {
        match self {
            Direction::Long  => "Buy",
            Direction::Short => "Sell",
        }
    }

    /// Order side that reduces exposure in this direction.
    pub fn close_side(self) -> &'static str {
        self.opposite().open_side()
    }

    /// Bybit reports positions with `side = "Buy" | "Sell"`.
    pub fn from_side(side: &str) -> Option<Self> {
        match side {
            "Buy"  => Some(Direction::Long),
            "Sell" => Some(Direction::Short),
            _      => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long  => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

// ─── Position ─────────────────────────────────────────────────────────────────

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol:      String,
    pub direction:   Direction,
    pub entry_price: Decimal,
    pub size:        Decimal,
    pub opened_at:   DateTime<Utc>,
    pub stop_loss:   Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Number of accepted entries merged into this row. The risk engine's
    /// position cap counts these, not rows: the exchange nets scale-ins into
    /// a single position per side.
    #[serde(default = "one")]
    pub entries:     u32,
}

impl Position {
    pub fn is(&self, symbol: &str, direction: Direction) -> bool {
        self.direction == direction && self.symbol == symbol
    }

    /// New row from the first fill on a `(symbol, direction)` pair.
    pub fn from_fill(order: &OrderRequest, receipt: &ExecutionReceipt) -> Self {
        Self {
            symbol:      order.symbol.clone(),
            direction:   order.direction,
            entry_price: receipt.price,
            size:        receipt.size,
            opened_at:   receipt.submitted_at,
            stop_loss:   order.stop_loss,
            take_profit: None,
            entries:     1,
        }
    }

    /// Merge a scale-in fill: size-weighted entry, latest stop wins.
    pub fn absorb(&mut self, order: &OrderRequest, receipt: &ExecutionReceipt) {
        let total = self.size + receipt.size;
        if !total.is_zero() {
            self.entry_price =
                (self.entry_price * self.size + receipt.price * receipt.size) / total;
        }
        self.size = total;
        self.entries += 1;
        if order.stop_loss.is_some() {
            self.stop_loss = order.stop_loss;
        }
    }
}
