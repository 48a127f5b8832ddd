//! # exchange::simulated — Paper trading
//!
//! Stands in for the trading endpoint when no credentials are configured.
//! Orders fill instantly at their reference (or limit) price against a local
//! book; no network request is ever made.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ExchangeError;
use crate::exchange::TradingClient;
use crate::models::{ExecutionReceipt, OrderRequest, Position};

pub const SIMULATED_ENDPOINT: &str = "simulated://local";

#[derive(Default)]
pub struct SimulatedExchange {
    book: RwLock<Vec<Position>>,
}

impl SimulatedExchange {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume with positions persisted by a previous run.
    pub fn with_positions(positions: Vec<Position>) -> Self {
        info!(count = positions.len(), "🧪 Simulated book restored");
        Self { book: RwLock::new(positions) }
    }

    fn order_id() -> String {
        format!("sim-{}", uuid::Uuid::new_v4().simple())
    }
}

#[async_trait]
impl TradingClient for SimulatedExchange {
    async fn list_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        Ok(self.book.read().await.clone())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<ExecutionReceipt, ExchangeError> {
        let receipt = ExecutionReceipt::for_order(Self::order_id(), order, true);
        let mut book = self.book.write().await;

        let existing = book.iter().position(|p| p.is(&order.symbol, order.direction));
        if order.reduce_only {
            let idx = existing.ok_or_else(|| ExchangeError::Rejected {
                code:    110017,
                message: format!("reduce-only order on {} with no open position", order.symbol),
            })?;
            book[idx].size -= order.size;
            if book[idx].size <= rust_decimal::Decimal::ZERO {
                book.remove(idx);
            }
        } else {
            match existing {
                Some(idx) => book[idx].absorb(order, &receipt),
                None => book.push(Position::from_fill(order, &receipt)),
            }
        }

        info!(
            order_id = %receipt.order_id,
            symbol   = %order.symbol,
            side     = order.side(),
            qty      = %order.size,
            price    = %receipt.price,
            "🧪 Simulated fill"
        );
        Ok(receipt)
    }

    async fn close_position(&self, position: &Position) -> Result<ExecutionReceipt, ExchangeError> {
        self.place_order(&OrderRequest::close_for(position)).await
    }

    fn endpoint(&self) -> &str {
        SIMULATED_ENDPOINT
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
