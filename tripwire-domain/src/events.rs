//! Trigger event records.
//!
//! Events are immutable outcome records: created once per meaningful
//! transition (trigger, order placed, order failed, blocked), logged, and
//! handed to the outbound queue for delivery to the collector.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::order::OrderRequest;
use crate::value_objects::OrderSide;

/// Kind of outcome recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Entry conditions matched
    EntryTriggered,
    /// Exit conditions matched
    ExitTriggered,
    /// Broker accepted the order
    OrderPlaced,
    /// Order was rejected (safety, broker, guard)
    OrderFailed,
    /// Rule matched a gate (cooldown, hourly cap, session cap) and was skipped
    CooldownBlocked,
}

impl EventType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EntryTriggered => "entry_triggered",
            EventType::ExitTriggered => "exit_triggered",
            EventType::OrderPlaced => "order_placed",
            EventType::OrderFailed => "order_failed",
            EventType::CooldownBlocked => "cooldown_blocked",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Process-local unique id
    pub event_id: Uuid,
    /// Rule id, or `position:<external id>` for copy-trade events
    pub rule_id: String,
    /// Outcome kind
    pub event_type: EventType,
    /// KPI map that caused the trigger (trigger events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_snapshot_json: Option<String>,
    /// Instrument
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Broker order id (order_placed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Order side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_side: Option<OrderSide>,
    /// Order quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_qty: Option<Decimal>,
    /// Order reference price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_price: Option<Decimal>,
    /// Failure or block reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Daemon instance that produced the record
    pub daemon_id: String,
    /// Creation time (RFC3339 on the wire)
    pub created_at: DateTime<Utc>,
}

impl TriggerEvent {
    /// New record with only the identifying fields set.
    pub fn new(
        rule_id: impl Into<String>,
        event_type: EventType,
        daemon_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            rule_id: rule_id.into(),
            event_type,
            trigger_snapshot_json: None,
            symbol: None,
            order_id: None,
            order_side: None,
            order_qty: None,
            order_price: None,
            detail: None,
            daemon_id: daemon_id.into(),
            created_at,
        }
    }

    /// Attach the triggering KPI map.
    pub fn with_snapshot_json(mut self, json: String) -> Self {
        self.trigger_snapshot_json = Some(json);
        self
    }

    /// Attach the instrument.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Copy the order fields from a request.
    pub fn with_order(mut self, order: &OrderRequest) -> Self {
        self.symbol = Some(order.symbol.clone());
        self.order_side = Some(order.side);
        self.order_qty = Some(order.quantity);
        self.order_price = order.reference_price();
        self
    }

    /// Attach the broker order id.
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Attach a failure or block reason.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::{OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_serialization() {
        let order = OrderRequest {
            symbol: "SPY".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            quantity: dec!(2),
            limit_price: Some(dec!(1.5)),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            client_order_id: "copy-ext-1-exit".to_string(),
        };

        let event = TriggerEvent::new("position:ext-1", EventType::OrderPlaced, "d-1", Utc::now())
            .with_order(&order)
            .with_order_id("BRK-7");

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "order_placed");
        assert_eq!(json["rule_id"], "position:ext-1");
        assert_eq!(json["order_side"], "sell");
        assert_eq!(json["order_id"], "BRK-7");
        assert!(json.get("trigger_snapshot_json").is_none());

        let parsed: TriggerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.order_price, Some(dec!(1.5)));
    }
}
