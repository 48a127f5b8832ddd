//! # engine::executor
//!
//! Turns an approved trade into a concrete [`OrderRequest`]: quantity from the
//! notional limit, stop from Wilder's ATR. Only reads market data; placing the
//! order is the tracker's job.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::TradingConfig;
use crate::error::{CommandError, TradeError};
use crate::exchange::{Candle, InstrumentInfo, MarketData};
use crate::models::{Direction, OrderKind, OrderRequest};

/// Fetch price, lot rules and candles for `symbol`, then build the entry order.
pub async fn prepare_entry(
    market:    &dyn MarketData,
    trading:   &TradingConfig,
    symbol:    &str,
    direction: Direction,
) -> Result<OrderRequest, TradeError> {
    let price = market.last_price(symbol).await?;
    let instrument = market.instrument(symbol).await?;

    // Enough history for the seed average plus smoothing.
    let wanted = trading.atr_period * 3 + 1;
    let atr = match market.candles(symbol, &trading.atr_interval, wanted).await {
        Ok(candles) => wilder_atr(&candles, trading.atr_period),
        Err(e) => {
            warn!(symbol, error = %e, "Candles unavailable — order goes out without a stop");
            None
        }
    };
    if atr.is_none() {
        debug!(symbol, "No ATR for stop placement");
    }

    Ok(build_entry(symbol, direction, price, instrument, atr, trading)?)
}

/// Pure part of [`prepare_entry`].
pub fn build_entry(
    symbol:     &str,
    direction:  Direction,
    price:      Decimal,
    instrument: InstrumentInfo,
    atr:        Option<Decimal>,
    trading:    &TradingConfig,
) -> Result<OrderRequest, CommandError> {
    let size = order_size(trading.trade_size_limit, price, instrument.qty_step);
    if size < instrument.min_qty || size.is_zero() {
        return Err(CommandError::SizeBelowMinimum {
            symbol:  symbol.to_string(),
            size:    size.normalize().to_string(),
            min_qty: instrument.min_qty.normalize().to_string(),
        });
    }

    let stop_loss = atr.map(|atr| stop_level(price, atr, trading.atr_multiplier, direction));

    Ok(OrderRequest {
        symbol: symbol.to_string(),
        direction,
        size,
        kind: trading.order_kind,
        limit_price: match trading.order_kind {
            OrderKind::Limit  => Some(price),
            OrderKind::Market => None,
        },
        reference_price: price,
        stop_loss,
        reduce_only: false,
        link_id: OrderRequest::new_link_id(),
    })
}

/// `limit / price` rounded down to a multiple of `qty_step`.
pub fn order_size(limit: Decimal, price: Decimal, qty_step: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = limit / price;
    if qty_step <= Decimal::ZERO {
        return raw;
    }
    ((raw / qty_step).floor() * qty_step).normalize()
}

/// Long stops sit below entry, short stops above.
pub fn stop_level(entry: Decimal, atr: Decimal, multiplier: Decimal, direction: Direction) -> Decimal {
    let distance = atr * multiplier;
    let stop = match direction {
        Direction::Long  => entry - distance,
        Direction::Short => entry + distance,
    };
    stop.round_dp(entry.scale().max(2)).max(Decimal::ZERO)
}

/// Wilder-smoothed Average True Range over `period`.
///
/// Seeds with the simple mean of the first `period` true ranges, then
/// `atr = (prev × (period − 1) + tr) / period`. Needs `period + 1` candles.
pub fn wilder_atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    let p = Decimal::from(period);
    let seed: Decimal = ranges[..period].iter().copied().sum::<Decimal>() / p;
    let atr = ranges[period..]
        .iter()
        .fold(seed, |prev, tr| (prev * (p - Decimal::ONE) + *tr) / p);
    Some(atr)
}

fn true_range(bar: &Candle, prev_close: Decimal) -> Decimal {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}
