//! Copy-trade path: mirror an external system's position lifecycle.
//!
//! | status               | tracked | action                                  |
//! |----------------------|---------|-----------------------------------------|
//! | active               | no      | entry order, track on acceptance        |
//! | active               | yes     | none (redelivery)                       |
//! | closing              | yes     | exit order on the inverse side, untrack |
//! | closing              | no      | none                                    |
//! | closed / deprecated  | any     | untrack, no order                       |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use tripwire_domain::{
    EventType, OrderRequest, OrderType, PositionEvent, TimeInForce, TradeStatus, TriggerEvent,
};

use crate::engine::{EngineState, SignalEngine, TrackedPosition};

impl SignalEngine {
    /// Process one batch of position events in order.
    ///
    /// Returns the events emitted for this batch.
    pub async fn process_position_events(&self, positions: Vec<PositionEvent>) -> Vec<TriggerEvent> {
        self.process_position_events_at(positions, Utc::now()).await
    }

    /// [`process_position_events`](Self::process_position_events) with an
    /// explicit clock.
    pub async fn process_position_events_at(
        &self,
        positions: Vec<PositionEvent>,
        now: DateTime<Utc>,
    ) -> Vec<TriggerEvent> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut events = Vec::new();

        for position in &positions {
            if !state.filter.matches(position) {
                debug!(external_id = %position.external_id, "Position filtered out");
                continue;
            }

            match position.trade_status {
                TradeStatus::Active => self.open(state, position, now, &mut events).await,
                TradeStatus::Closing => self.close(state, position, now, &mut events).await,
                TradeStatus::Closed | TradeStatus::Deprecated => {
                    if state.tracked.remove(&position.external_id).is_some() {
                        info!(
                            external_id = %position.external_id,
                            status = %position.trade_status,
                            "Tracking dropped"
                        );
                    }
                }
                TradeStatus::Unknown => {
                    debug!(external_id = %position.external_id, "Unknown trade status, skipped");
                }
            }
        }

        events
    }

    async fn open(
        &self,
        state: &mut EngineState,
        position: &PositionEvent,
        now: DateTime<Utc>,
        events: &mut Vec<TriggerEvent>,
    ) {
        if state.tracked.contains_key(&position.external_id) {
            debug!(external_id = %position.external_id, "Position already tracked");
            return;
        }

        let record_id = position.record_id();

        if state.session_orders >= self.config.max_orders_per_session {
            warn!(external_id = %position.external_id, "Session order cap reached");
            self.emit(
                events,
                TriggerEvent::new(&record_id, EventType::OrderFailed, &self.config.daemon_id, now)
                    .with_symbol(position.symbol())
                    .with_detail(format!(
                        "session order cap reached ({}/{})",
                        state.session_orders, self.config.max_orders_per_session
                    )),
            );
            return;
        }

        let Some(side) = position.entry_side else {
            self.emit(
                events,
                TriggerEvent::new(&record_id, EventType::OrderFailed, &self.config.daemon_id, now)
                    .with_symbol(position.symbol())
                    .with_detail("missing entry side"),
            );
            return;
        };

        let order_type = state
            .filter
            .order_type_override
            .or(position.entry_type)
            .unwrap_or_default();
        let (limit_price, stop_price) = price_for(order_type, position.entry_price);

        let Some(quantity) = state.filter.scaled_quantity(position) else {
            warn!(external_id = %position.external_id, "Scaled quantity overflowed");
            self.emit(
                events,
                TriggerEvent::new(&record_id, EventType::OrderFailed, &self.config.daemon_id, now)
                    .with_symbol(position.symbol())
                    .with_detail("scaled quantity overflow"),
            );
            return;
        };

        let request = OrderRequest {
            symbol: position.symbol().to_string(),
            side,
            order_type,
            quantity,
            limit_price,
            stop_price,
            time_in_force: TimeInForce::Day,
            client_order_id: format!("copy-{}-entry", position.external_id),
        };

        if self.config.dry_run {
            info!(
                external_id = %position.external_id,
                symbol = %request.symbol,
                side = %request.side,
                qty = %request.quantity,
                "Dry run: copy entry not submitted"
            );
            return;
        }

        let result = self
            .submit(&record_id, &request, &mut state.session_orders)
            .await;

        if let Ok(placed) = &result {
            state.tracked.insert(
                position.external_id.clone(),
                TrackedPosition {
                    external_id: position.external_id.clone(),
                    symbol: request.symbol.clone(),
                    entry_side: request.side,
                    quantity: request.quantity,
                    order_id: placed.order_id.clone(),
                    opened_at: now,
                },
            );
        }

        let event = self.order_outcome(&record_id, &request, result, now);
        self.emit(events, event);
    }

    async fn close(
        &self,
        state: &mut EngineState,
        position: &PositionEvent,
        now: DateTime<Utc>,
        events: &mut Vec<TriggerEvent>,
    ) {
        let Some(tracked) = state.tracked.get(&position.external_id).cloned() else {
            debug!(external_id = %position.external_id, "Closing untracked position, ignored");
            return;
        };

        let record_id = position.record_id();
        let order_type = position.exit_type.unwrap_or_default();
        let (limit_price, stop_price) = price_for(order_type, position.exit_price);

        // The closing event's own side is ignored
        let request = OrderRequest {
            symbol: tracked.symbol.clone(),
            side: tracked.entry_side.inverse(),
            order_type,
            quantity: tracked.quantity,
            limit_price,
            stop_price,
            time_in_force: TimeInForce::Day,
            client_order_id: format!("copy-{}-exit", position.external_id),
        };

        let result = self
            .submit(&record_id, &request, &mut state.session_orders)
            .await;
        let event = self.order_outcome(&record_id, &request, result, now);
        self.emit(events, event);

        state.tracked.remove(&position.external_id);
    }
}

/// (limit, stop) prices for an order type, taken from the event's price.
fn price_for(order_type: OrderType, price: Option<Decimal>) -> (Option<Decimal>, Option<Decimal>) {
    let limit = if order_type.needs_limit_price() { price } else { None };
    let stop = if order_type.needs_stop_price() { price } else { None };
    (limit, stop)
}

// =============================================================================
// Tests
// =============================================================================
