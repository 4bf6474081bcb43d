//! Safety ceiling.
//!
//! Pure checks applied to every order before it reaches a broker, on both
//! the rule trigger path and the copy-trade path. Rule content cannot
//! relax them: limits come only from [`SafetyConfig`].

use rust_decimal::Decimal;
use thiserror::Error;
use tripwire_domain::{OrderRequest, SafetyConfig};

/// Reason an order was refused before submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("Quantity {qty} exceeds max order quantity {max}")]
    QuantityExceeded { qty: Decimal, max: Decimal },

    #[error("Estimated notional {notional} exceeds max order value {max}")]
    NotionalExceeded { notional: Decimal, max: Decimal },

    #[error("Daily loss limit reached: unrealized P&L {pl}, limit {limit}")]
    DailyLossLimit { pl: Decimal, limit: Decimal },
}

/// Validate quantity and estimated notional against the configured limits.
///
/// Notional is only checked when the order carries a limit or stop price;
/// market orders have no price to estimate from.
pub fn validate_order(request: &OrderRequest, cfg: &SafetyConfig) -> Result<(), SafetyViolation> {
    if request.quantity <= Decimal::ZERO {
        return Err(SafetyViolation::NonPositiveQuantity(request.quantity));
    }

    if request.quantity > cfg.max_order_qty {
        return Err(SafetyViolation::QuantityExceeded {
            qty: request.quantity,
            max: cfg.max_order_qty,
        });
    }

    if let Some(notional) = request.estimated_notional() {
        if notional > cfg.max_order_value {
            return Err(SafetyViolation::NotionalExceeded {
                notional,
                max: cfg.max_order_value,
            });
        }
    }

    Ok(())
}

/// Reject when the aggregate unrealized P&L is a loss whose magnitude
/// meets or exceeds the daily loss limit. Only applied to buys.
pub fn validate_daily_loss(unrealized_pl: Decimal, cfg: &SafetyConfig) -> Result<(), SafetyViolation> {
    if unrealized_pl < Decimal::ZERO && -unrealized_pl >= cfg.daily_loss_limit {
        return Err(SafetyViolation::DailyLossLimit {
            pl: unrealized_pl,
            limit: cfg.daily_loss_limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tripwire_domain::{OrderSide, OrderType, TimeInForce};

    fn cfg() -> SafetyConfig {
        SafetyConfig {
            max_order_qty: dec!(1000),
            max_order_value: dec!(10000),
            daily_loss_limit: dec!(500),
            require_confirmation: false,
        }
    }

    fn order(qty: Decimal, limit_price: Option<Decimal>) -> OrderRequest {
        OrderRequest {
            symbol: "SPY".to_string(),
            side: OrderSide::Buy,
            order_type: if limit_price.is_some() { OrderType::Limit } else { OrderType::Market },
            quantity: qty,
            limit_price,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            client_order_id: "t".to_string(),
        }
    }

    #[test]
    fn test_quantity_limits() {
        assert!(validate_order(&order(dec!(1000), None), &cfg()).is_ok());
        assert_eq!(
            validate_order(&order(dec!(1001), None), &cfg()),
            Err(SafetyViolation::QuantityExceeded { qty: dec!(1001), max: dec!(1000) })
        );
        assert!(matches!(
            validate_order(&order(dec!(0), None), &cfg()),
            Err(SafetyViolation::NonPositiveQuantity(_))
        ));
        assert!(matches!(
            validate_order(&order(dec!(-3), None), &cfg()),
            Err(SafetyViolation::NonPositiveQuantity(_))
        ));
    }

    #[test]
    fn test_notional_limit() {
        // 100 × 100 = 10000 is exactly at the limit
        assert!(validate_order(&order(dec!(100), Some(dec!(100))), &cfg()).is_ok());

        let result = validate_order(&order(dec!(100), Some(dec!(100.01))), &cfg());
        assert_eq!(
            result,
            Err(SafetyViolation::NotionalExceeded { notional: dec!(10001.00), max: dec!(10000) })
        );
    }

    #[test]
    fn test_overflowing_notional_exceeds_limit() {
        let result = validate_order(&order(dec!(2), Some(Decimal::MAX)), &cfg());
        assert_eq!(
            result,
            Err(SafetyViolation::NotionalExceeded { notional: Decimal::MAX, max: dec!(10000) })
        );
    }

    #[test]
    fn test_stop_price_feeds_notional() {
        let mut request = order(dec!(50), None);
        request.order_type = OrderType::Stop;
        request.stop_price = Some(dec!(300));

        assert!(matches!(
            validate_order(&request, &cfg()),
            Err(SafetyViolation::NotionalExceeded { .. })
        ));
    }

    #[test]
    fn test_daily_loss_limit() {
        assert!(validate_daily_loss(dec!(250), &cfg()).is_ok());
        assert!(validate_daily_loss(dec!(-499.99), &cfg()).is_ok());
        assert!(validate_daily_loss(dec!(-500), &cfg()).is_err(), "exactly at the limit");
        assert!(validate_daily_loss(dec!(-800), &cfg()).is_err());
    }
}
