//! # models::order
//!
//! What the daemon sends to the exchange ([`OrderRequest`]) and what it gets
//! back ([`ExecutionReceipt`]).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Direction, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

impl OrderKind {
    pub fn as_bybit(self) -> &'static str {
        match self {
            OrderKind::Market => "Market",
            OrderKind::Limit  => "Limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol:          String,
    pub direction:       Direction,
    pub size:            Decimal,
    pub kind:            OrderKind,
    /// Only set for `OrderKind::Limit`.
    pub limit_price:     Option<Decimal>,
    /// Last traded price used for sizing; recorded as the fill price when the
    /// exchange acknowledgment does not carry one.
    pub reference_price: Decimal,
    pub stop_loss:       Option<Decimal>,
    pub reduce_only:     bool,
    /// Client order id (`orderLinkId`) so a retried submit is recognisable.
    pub link_id:         String,
}

impl OrderRequest {
    pub fn new_link_id() -> String {
        format!("bd-{}", &uuid::Uuid::new_v4().simple().to_string()[..20])
    }

    /// Reduce-only market order that flattens `position` in full.
    pub fn close_for(position: &Position) -> Self {
        Self {
            symbol:          position.symbol.clone(),
            direction:       position.direction,
            size:            position.size,
            kind:            OrderKind::Market,
            limit_price:     None,
            reference_price: position.entry_price,
            stop_loss:       None,
            reduce_only:     true,
            link_id:         Self::new_link_id(),
        }
    }

    /// Exchange side: opening buys a long, closing sells it.
    pub fn side(&self) -> &'static str {
        if self.reduce_only {
            self.direction.close_side()
        } else {
            self.direction.open_side()
        }
    }
}

/// Immediate acknowledgment of an accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub order_id:     String,
    pub symbol:       String,
    /// Direction of the exposure the order opened or closed.
    pub direction:    Direction,
    pub size:         Decimal,
    pub price:        Decimal,
    pub reduce_only:  bool,
    /// Locally generated (simulation mode), no exchange involved.
    pub simulated:    bool,
    pub submitted_at: DateTime<Utc>,
}

impl ExecutionReceipt {
    pub fn for_order(order_id: String, order: &OrderRequest, simulated: bool) -> Self {
        Self {
            order_id,
            symbol:       order.symbol.clone(),
            direction:    order.direction,
            size:         order.size,
            price:        order.limit_price.unwrap_or(order.reference_price),
            reduce_only:  order.reduce_only,
            simulated,
            submitted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_close_order_flips_side() {
        let pos = Position {
            symbol:      "ETHUSDT".into(),
            direction:   Direction::Short,
            entry_price: dec!(3000),
            size:        dec!(0.5),
            opened_at:   Utc::now(),
            stop_loss:   Some(dec!(3100)),
            take_profit: None,
            entries:     2,
        };
        let order = OrderRequest::close_for(&pos);
        assert!(order.reduce_only);
        assert_eq!(order.size, dec!(0.5));
        assert_eq!(order.side(), "Buy");
        assert_eq!(order.kind, OrderKind::Market);
        assert!(order.link_id.starts_with("bd-"));
        assert_eq!(order.link_id.len(), 23);
    }

    #[test]
    fn test_receipt_price_prefers_limit() {
        let mut order = OrderRequest::close_for(&Position {
            symbol:      "BTCUSDT".into(),
            direction:   Direction::Long,
            entry_price: dec!(60000),
            size:        dec!(0.01),
            opened_at:   Utc::now(),
            stop_loss:   None,
            take_profit: None,
            entries:     1,
        });
        assert_eq!(order.side(), "Sell");
        assert_eq!(ExecutionReceipt::for_order("x".into(), &order, true).price, dec!(60000));
        order.limit_price = Some(dec!(61000));
        assert_eq!(ExecutionReceipt::for_order("x".into(), &order, true).price, dec!(61000));
    }
}
