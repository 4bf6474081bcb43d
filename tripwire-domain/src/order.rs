//! Order requests and the safety limits applied to them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{OrderSide, OrderType, TimeInForce};

/// An order about to be handed to the broker.
///
/// Built by the rule trigger path and by the copy-trade path; both run it
/// through the same safety checks before submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Instrument
    pub symbol: String,
    /// Buy or sell
    pub side: OrderSide,
    /// Order type
    pub order_type: OrderType,
    /// Quantity
    pub quantity: Decimal,
    /// Limit price (limit / stop-limit)
    pub limit_price: Option<Decimal>,
    /// Stop price (stop / stop-limit)
    pub stop_price: Option<Decimal>,
    /// Time in force
    pub time_in_force: TimeInForce,
    /// Deterministic client id used for duplicate suppression
    pub client_order_id: String,
}

impl OrderRequest {
    /// Price used to estimate notional: limit price, else stop price.
    pub fn reference_price(&self) -> Option<Decimal> {
        self.limit_price.or(self.stop_price)
    }

    /// Estimated notional (quantity × reference price) when a price is known.
    ///
    /// Saturates at `Decimal::MAX` when the product overflows.
    pub fn estimated_notional(&self) -> Option<Decimal> {
        self.reference_price()
            .map(|price| price.checked_mul(self.quantity).unwrap_or(Decimal::MAX))
    }

    /// Whether this order opens exposure (buy side).
    pub fn is_buy(&self) -> bool {
        self.side == OrderSide::Buy
    }
}

/// Hard ceilings enforced on every order path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Largest quantity accepted on a single order
    pub max_order_qty: Decimal,
    /// Largest estimated notional accepted on a single order
    pub max_order_value: Decimal,
    /// Unrealized loss (as a positive magnitude) at which buys stop
    pub daily_loss_limit: Decimal,
    /// Advisory: orders are still submitted, and each submission is logged
    /// as awaiting out-of-band operator confirmation
    #[serde(default)]
    pub require_confirmation: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_order_qty: Decimal::from(1000),
            max_order_value: Decimal::from(50_000),
            daily_loss_limit: Decimal::from(5_000),
            require_confirmation: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(limit: Option<Decimal>, stop: Option<Decimal>) -> OrderRequest {
        OrderRequest {
            symbol: "SPY".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(10),
            limit_price: limit,
            stop_price: stop,
            time_in_force: TimeInForce::Day,
            client_order_id: "rule-x-1".to_string(),
        }
    }

    #[test]
    fn test_estimated_notional_prefers_limit_price() {
        assert_eq!(request(Some(dec!(2.5)), Some(dec!(3))).estimated_notional(), Some(dec!(25)));
        assert_eq!(request(None, Some(dec!(3))).estimated_notional(), Some(dec!(30)));
        assert_eq!(request(None, None).estimated_notional(), None);
    }

    #[test]
    fn test_estimated_notional_saturates_on_overflow() {
        assert_eq!(request(Some(Decimal::MAX), None).estimated_notional(), Some(Decimal::MAX));
        assert_eq!(request(Some(Decimal::MIN), None).estimated_notional(), Some(Decimal::MAX));
    }
}
