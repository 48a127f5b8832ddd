//! # exchange — Exchange Adapter
//!
//! Two roles, two traits:
//!
//! * [`MarketData`] — public prices, instrument rules and candles. Always the
//!   production endpoint, even when trading against the testnet.
//! * [`TradingClient`] — authenticated position listing and order placement on
//!   the endpoint `BYBIT_TESTNET` resolves to, or the local simulator.
//!
//! The rest of the daemon only sees `Arc<dyn …>`, so a fake can stand in for
//! either role in tests.

pub mod bybit;
pub mod selector;
pub mod simulated;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;
use crate::models::{ExecutionReceipt, OrderRequest, Position};

pub use bybit::BybitClient;
pub use selector::{select_clients, ExchangeClients, ResolvedEndpoints};
pub use simulated::SimulatedExchange;

/// Order-size rules for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub qty_step: Decimal,
    pub min_qty:  Decimal,
}

/// One OHLC bar, oldest first when returned in a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open:         Decimal,
    pub high:         Decimal,
    pub low:          Decimal,
    pub close:        Decimal,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn instrument(&self, symbol: &str) -> Result<InstrumentInfo, ExchangeError>;

    /// Most recent `limit` candles, oldest first.
    async fn candles(
        &self,
        symbol:   &str,
        interval: &str,
        limit:    usize,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

#[async_trait]
pub trait TradingClient: Send + Sync {
    /// Open positions (size > 0) for the account.
    async fn list_positions(&self) -> Result<Vec<Position>, ExchangeError>;

    async fn place_order(&self, order: &OrderRequest) -> Result<ExecutionReceipt, ExchangeError>;

    /// Flatten one position with a reduce-only order on the opposite side.
    async fn close_position(&self, position: &Position) -> Result<ExecutionReceipt, ExchangeError>;

    /// Base URL the client talks to (or a `sim://` marker).
    fn endpoint(&self) -> &str;

    fn is_simulated(&self) -> bool {
        false
    }
}
