//! Scriptable fakes for both exchange roles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::ExchangeError;
use crate::exchange::{Candle, InstrumentInfo, MarketData, TradingClient};
use crate::models::{ExecutionReceipt, OrderRequest, Position};

pub const FAKE_ENDPOINT: &str = "https://fake.exchange";

// ─── Market data ──────────────────────────────────────────────────────────────

pub struct FakeMarket {
    pub price:      Mutex<Decimal>,
    pub instrument: InstrumentInfo,
    pub candles:    Mutex<Result<Vec<Candle>, ExchangeError>>,
    pub calls:      AtomicUsize,
}

impl FakeMarket {
    pub fn new(price: Decimal) -> Self {
        Self {
            price:      Mutex::new(price),
            instrument: InstrumentInfo { qty_step: dec!(0.001), min_qty: dec!(0.001) },
            candles:    Mutex::new(Ok(flat_candles(price, dec!(10), 30))),
            calls:      AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// `n` bars around `price` with a constant high-low range of `range`.
pub fn flat_candles(price: Decimal, range: Decimal, n: usize) -> Vec<Candle> {
    let half = range / dec!(2);
    (0..n)
        .map(|i| Candle {
            open_time_ms: i as i64 * 60_000,
            open:         price,
            high:         price + half,
            low:          price - half,
            close:        price,
        })
        .collect()
}

#[async_trait]
impl MarketData for FakeMarket {
    async fn last_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.price.lock().unwrap())
    }

    async fn instrument(&self, _symbol: &str) -> Result<InstrumentInfo, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.instrument)
    }

    async fn candles(
        &self,
        _symbol:   &str,
        _interval: &str,
        limit:     usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let candles = self.candles.lock().unwrap().clone()?;
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }
}

// ─── Trading ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeTrading {
    pub positions:     Mutex<Vec<Position>>,
    pub orders:        Mutex<Vec<OrderRequest>>,
    pub closed:        Mutex<Vec<String>>,
    /// Returned (once per call) by `list_positions` while set.
    pub list_error:    Mutex<Option<ExchangeError>>,
    /// Returned by `place_order` while set.
    pub order_error:   Mutex<Option<ExchangeError>>,
    /// Symbols whose close fails.
    pub close_failing: Mutex<Vec<String>>,
    /// Slept before an order is accepted.
    pub order_delay:   Mutex<Option<Duration>>,
    pub calls:         AtomicUsize,
}

impl FakeTrading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions(positions: Vec<Position>) -> Self {
        let fake = Self::default();
        *fake.positions.lock().unwrap() = positions;
        fake
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_orders(&self, err: ExchangeError) {
        *self.order_error.lock().unwrap() = Some(err);
    }

    pub fn fail_listing(&self, err: ExchangeError) {
        *self.list_error.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl TradingClient for FakeTrading {
    async fn list_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<ExecutionReceipt, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.order_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.order_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.orders.lock().unwrap().push(order.clone());
        let receipt = ExecutionReceipt::for_order(format!("fake-{}", self.calls()), order, false);

        // behave like the exchange: the fill shows up in the next listing
        let mut positions = self.positions.lock().unwrap();
        match positions.iter_mut().find(|p| p.is(&order.symbol, order.direction)) {
            Some(pos) => pos.absorb(order, &receipt),
            None => positions.push(Position::from_fill(order, &receipt)),
        }
        Ok(receipt)
    }

    async fn close_position(&self, position: &Position) -> Result<ExecutionReceipt, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.close_failing.lock().unwrap().contains(&position.symbol) {
            return Err(ExchangeError::Network(format!("close {} failed", position.symbol)));
        }
        self.closed.lock().unwrap().push(position.symbol.clone());
        self.positions
            .lock()
            .unwrap()
            .retain(|p| !p.is(&position.symbol, position.direction));
        Ok(ExecutionReceipt::for_order("fake-close".into(), &OrderRequest::close_for(position), false))
    }

    fn endpoint(&self) -> &str {
        FAKE_ENDPOINT
    }
}
