//! SignalEngine: the single owner of all mutable trigger state.
//!
//! Both triggering paths run through here:
//!
//! ```text
//! Snapshot        → evaluate()                → gate → conditions → order
//! PositionEvent[] → process_position_events() → filter → dedup  → order
//! ```
//!
//! Every public operation takes the one state lock for its whole duration,
//! broker call included, so the two paths never interleave.
//!
//! # Order path
//!
//! Every order, whatever its origin, goes through the same sequence:
//!
//! 1. Safety ceiling (quantity, notional)
//! 2. Daily-loss check (buys only)
//! 3. Endpoint guard
//! 4. Journal (duplicate client id refused)
//! 5. Broker submission

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tripwire_domain::{
    EventType, OrderRequest, OrderSide, PositionFilter, Rule, RuleStatus, SafetyConfig, Snapshot,
    TriggerEvent,
};
use tripwire_engine::{
    evaluate, validate_daily_loss, validate_order, GateDecision, RuleMatch, TriggerGate,
};

use crate::error::{ExecError, ExecResult};
use crate::guard::EndpointGuard;
use crate::journal::OrderJournal;
use crate::ports::{aggregate_unrealized_pl, BrokerPort, OrderResult};
use crate::sink::EventSink;

// =============================================================================
// Configuration
// =============================================================================

/// Engine settings fixed for the life of a session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Daemon instance id stamped on every event
    pub daemon_id: String,
    /// Evaluate and log only; no broker calls, no tracked state
    pub dry_run: bool,
    /// Hard order limits
    pub safety: SafetyConfig,
    /// Rolling one-hour trigger cap per rule
    pub max_triggers_per_rule_per_hour: usize,
    /// Orders that may reach the broker in one session
    pub max_orders_per_session: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            daemon_id: "tripwire".to_string(),
            dry_run: false,
            safety: SafetyConfig::default(),
            max_triggers_per_rule_per_hour: 10,
            max_orders_per_session: 50,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// A copy-trade position opened by this session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedPosition {
    /// Id assigned by the external system
    pub external_id: String,
    /// Instrument the entry was placed on
    pub symbol: String,
    /// Side of the entry order
    pub entry_side: OrderSide,
    /// Quantity of the entry order
    pub quantity: rust_decimal::Decimal,
    /// Broker order id of the entry
    pub order_id: String,
    /// When the entry was accepted
    pub opened_at: DateTime<Utc>,
}

/// Point-in-time view for the status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub rules_total: usize,
    pub rules_active: usize,
    pub rules_paused: usize,
    pub rules_disabled: usize,
    pub session_orders: usize,
    pub max_orders_per_session: usize,
    pub tracked_positions: usize,
    pub dry_run: bool,
    pub filter_enabled: bool,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

pub(crate) struct EngineState {
    pub(crate) rules: Vec<Rule>,
    pub(crate) gate: TriggerGate,
    pub(crate) tracked: HashMap<String, TrackedPosition>,
    pub(crate) session_orders: usize,
    pub(crate) previous: Option<Snapshot>,
    pub(crate) filter: PositionFilter,
}

// =============================================================================
// SignalEngine
// =============================================================================

/// Synchronized owner of rules, gates, tracked positions and the session
/// counter.
pub struct SignalEngine {
    pub(crate) config: EngineConfig,
    pub(crate) broker: Arc<dyn BrokerPort>,
    pub(crate) sink: Arc<dyn EventSink>,
    guard: EndpointGuard,
    journal: Arc<OrderJournal>,
    pub(crate) state: Mutex<EngineState>,
}

impl SignalEngine {
    /// Create an engine with an empty rule set and a disabled filter.
    pub fn new(
        config: EngineConfig,
        broker: Arc<dyn BrokerPort>,
        sink: Arc<dyn EventSink>,
        guard: EndpointGuard,
    ) -> Self {
        let gate = TriggerGate::new(config.max_triggers_per_rule_per_hour);
        Self {
            config,
            broker,
            sink,
            guard,
            journal: Arc::new(OrderJournal::new()),
            state: Mutex::new(EngineState {
                rules: Vec::new(),
                gate,
                tracked: HashMap::new(),
                session_orders: 0,
                previous: None,
                filter: PositionFilter::default(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn journal(&self) -> Arc<OrderJournal> {
        Arc::clone(&self.journal)
    }

    /// Replace the rule set. Rules are kept in `rule_id` order; gate state
    /// of rules that are no longer present is dropped.
    pub async fn set_rules(&self, mut rules: Vec<Rule>) {
        rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        rules.dedup_by(|a, b| a.rule_id == b.rule_id);

        let mut state = self.state.lock().await;
        state
            .gate
            .retain_rules(|id| rules.iter().any(|r| r.rule_id == id));

        info!(
            total = rules.len(),
            active = rules.iter().filter(|r| r.is_active()).count(),
            "Rule set loaded"
        );
        state.rules = rules;
    }

    /// Replace the copy-trade filter.
    pub async fn set_filter(&self, filter: PositionFilter) {
        info!(enabled = filter.enabled, "Position filter updated");
        self.state.lock().await.filter = filter;
    }

    pub async fn rules(&self) -> Vec<Rule> {
        self.state.lock().await.rules.clone()
    }

    pub async fn filter(&self) -> PositionFilter {
        self.state.lock().await.filter.clone()
    }

    pub async fn tracked_positions(&self) -> Vec<TrackedPosition> {
        let state = self.state.lock().await;
        let mut tracked: Vec<TrackedPosition> = state.tracked.values().cloned().collect();
        tracked.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        tracked
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.lock().await;
        let count = |status: RuleStatus| state.rules.iter().filter(|r| r.status == status).count();

        EngineStatus {
            rules_total: state.rules.len(),
            rules_active: count(RuleStatus::Active),
            rules_paused: count(RuleStatus::Paused),
            rules_disabled: count(RuleStatus::Disabled),
            session_orders: state.session_orders,
            max_orders_per_session: self.config.max_orders_per_session,
            tracked_positions: state.tracked.len(),
            dry_run: self.config.dry_run,
            filter_enabled: state.filter.enabled,
            last_snapshot_at: state.previous.as_ref().map(|s| s.updated_at),
        }
    }

    // =========================================================================
    // Rule path
    // =========================================================================

    /// Evaluate every active rule against `snapshot`.
    ///
    /// Returns the events emitted during this cycle (they have already been
    /// handed to the sink).
    pub async fn evaluate(&self, snapshot: Snapshot) -> Vec<TriggerEvent> {
        self.evaluate_at(snapshot, Utc::now()).await
    }

    /// [`evaluate`](Self::evaluate) with an explicit clock.
    pub async fn evaluate_at(&self, snapshot: Snapshot, now: DateTime<Utc>) -> Vec<TriggerEvent> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut events = Vec::new();

        let previous = state.previous.take();
        let max_orders = self.config.max_orders_per_session;

        for rule in state.rules.iter().filter(|r| r.is_active()) {
            let gate = state.gate.check(&rule.rule_id, now);
            let session_full = state.session_orders >= max_orders;

            if !gate.is_allowed() || session_full {
                // Only report a block when the rule would otherwise have fired
                if tripwire_engine::test_rule(rule, &snapshot, previous.as_ref()).is_match() {
                    let reason = match gate {
                        GateDecision::Allowed => format!(
                            "session order cap reached ({}/{})",
                            state.session_orders, max_orders
                        ),
                        blocked => blocked.to_string(),
                    };
                    debug!(rule_id = %rule.rule_id, %reason, "Rule blocked");
                    self.emit(
                        &mut events,
                        TriggerEvent::new(&rule.rule_id, EventType::CooldownBlocked, &self.config.daemon_id, now)
                            .with_detail(reason),
                    );
                }
                continue;
            }

            let matched = if evaluate(&rule.entry, &snapshot, previous.as_ref()) {
                RuleMatch::Entry
            } else if rule
                .exit
                .as_ref()
                .is_some_and(|exit| evaluate(exit, &snapshot, previous.as_ref()))
            {
                RuleMatch::Exit
            } else {
                RuleMatch::None
            };

            let (event_type, side) = match matched {
                RuleMatch::Entry => (EventType::EntryTriggered, rule.order.side),
                RuleMatch::Exit => (EventType::ExitTriggered, rule.order.side.inverse()),
                RuleMatch::None => continue,
            };

            info!(rule_id = %rule.rule_id, name = %rule.name, %event_type, "Rule triggered");

            let mut trigger = TriggerEvent::new(&rule.rule_id, event_type, &self.config.daemon_id, now)
                .with_snapshot_json(snapshot.kpis_json());
            if let Some(symbol) = rule.primary_symbol() {
                trigger = trigger.with_symbol(symbol);
            }
            self.emit(&mut events, trigger);

            state.gate.record(&rule.rule_id, now, rule.cooldown_duration());

            if self.config.dry_run {
                info!(rule_id = %rule.rule_id, %side, qty = %rule.order.qty, "Dry run: order not submitted");
                continue;
            }

            let Some(symbol) = rule.primary_symbol() else {
                warn!(rule_id = %rule.rule_id, "Rule has no symbol, cannot place order");
                self.emit(
                    &mut events,
                    TriggerEvent::new(&rule.rule_id, EventType::OrderFailed, &self.config.daemon_id, now)
                        .with_detail("no symbol"),
                );
                continue;
            };

            let request = OrderRequest {
                symbol: symbol.to_string(),
                side,
                order_type: rule.order.order_type,
                quantity: rule.order.qty,
                limit_price: rule.order.limit_price,
                stop_price: rule.order.stop_price,
                time_in_force: rule.order.tif,
                client_order_id: format!("rule-{}-{}", rule.rule_id, now.timestamp_millis()),
            };

            let result = self
                .submit(&rule.rule_id, &request, &mut state.session_orders)
                .await;
            let event = self.order_outcome(&rule.rule_id, &request, result, now);
            self.emit(&mut events, event);
        }

        // Every rule above saw the same (previous, current) pair
        state.previous = Some(snapshot);
        events
    }

    // =========================================================================
    // Shared order path
    // =========================================================================

    /// Run the full pre-trade sequence and submit. The session counter is
    /// incremented once the order is handed to the broker, whatever the
    /// broker answers.
    pub(crate) async fn submit(
        &self,
        source: &str,
        request: &OrderRequest,
        session_orders: &mut usize,
    ) -> ExecResult<OrderResult> {
        validate_order(request, &self.config.safety)?;

        if request.is_buy() {
            let positions = self.broker.get_positions().await.map_err(|e| {
                ExecError::InvalidState(format!("cannot read positions for daily loss check: {}", e))
            })?;
            let pl = aggregate_unrealized_pl(&positions).ok_or_else(|| {
                ExecError::InvalidState("unrealized P&L overflowed during daily loss check".to_string())
            })?;
            validate_daily_loss(pl, &self.config.safety)?;
        }

        self.guard.check(self.broker.endpoint())?;
        self.journal.record(source, request)?;

        *session_orders += 1;
        info!(
            %source,
            client_order_id = %request.client_order_id,
            symbol = %request.symbol,
            side = %request.side,
            qty = %request.quantity,
            "Submitting order"
        );
        if self.config.safety.require_confirmation {
            warn!(
                client_order_id = %request.client_order_id,
                "Order requires out-of-band operator confirmation"
            );
        }

        match self.broker.create_order(request).await {
            Ok(result) => {
                self.journal.accept(&request.client_order_id, &result.order_id)?;
                Ok(result)
            }
            Err(e) => {
                self.journal.fail(&request.client_order_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Turn a submission result into an `order_placed` / `order_failed` record.
    pub(crate) fn order_outcome(
        &self,
        source: &str,
        request: &OrderRequest,
        result: ExecResult<OrderResult>,
        now: DateTime<Utc>,
    ) -> TriggerEvent {
        match result {
            Ok(placed) => {
                info!(%source, order_id = %placed.order_id, "Order placed");
                TriggerEvent::new(source, EventType::OrderPlaced, &self.config.daemon_id, now)
                    .with_order(request)
                    .with_order_id(placed.order_id)
            }
            Err(e) => {
                warn!(%source, client_order_id = %request.client_order_id, error = %e, "Order failed");
                TriggerEvent::new(source, EventType::OrderFailed, &self.config.daemon_id, now)
                    .with_order(request)
                    .with_detail(e.to_string())
            }
        }
    }

    pub(crate) fn emit(&self, events: &mut Vec<TriggerEvent>, event: TriggerEvent) {
        events.push(event.clone());
        self.sink.emit(event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use crate::stub::StubBroker;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use tripwire_domain::{
        ConditionGroup, ConditionItem, Operator, OrderParams, OrderType, TimeInForce,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    fn rule(id: &str, entry: ConditionGroup) -> Rule {
        Rule {
            version: 1,
            rule_id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            status: RuleStatus::Active,
            symbols: vec!["SPY".to_string()],
            entry,
            exit: None,
            order: OrderParams {
                side: OrderSide::Buy,
                order_type: OrderType::Market,
                qty: dec!(1),
                tif: TimeInForce::Day,
                limit_price: None,
                stop_price: None,
            },
            cooldown: 300,
        }
    }

    fn delta_above(threshold: f64) -> ConditionGroup {
        ConditionGroup::all(vec![ConditionItem::leaf("Delta", Operator::GreaterThan, threshold)])
    }

    fn snap(delta: f64) -> Snapshot {
        Snapshot::new("test", t0()).with_kpi("Delta", delta)
    }

    fn engine(config: EngineConfig) -> (SignalEngine, Arc<StubBroker>, Arc<RecordingSink>) {
        let broker = Arc::new(StubBroker::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = SignalEngine::new(
            config,
            broker.clone(),
            sink.clone(),
            EndpointGuard::new("sandbox"),
        );
        (engine, broker, sink)
    }

    #[tokio::test]
    async fn test_trigger_places_order() {
        let (engine, broker, sink) = engine(EngineConfig::default());
        engine.set_rules(vec![rule("r1", delta_above(0.5))]).await;

        let events = engine.evaluate_at(snap(0.6), t0()).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::EntryTriggered);
        assert!(events[0].trigger_snapshot_json.as_deref().unwrap().contains("Delta"));
        assert_eq!(events[1].event_type, EventType::OrderPlaced);
        assert_eq!(events[1].order_id.as_deref(), Some("STUB-1"));
        assert_eq!(broker.order_count(), 1);
        assert_eq!(sink.events().len(), 2);
        assert_eq!(engine.status().await.session_orders, 1);
    }

    #[tokio::test]
    async fn test_confirmation_flag_is_advisory() {
        let mut config = EngineConfig::default();
        config.safety.require_confirmation = true;
        let (engine, broker, sink) = engine(config);
        engine.set_rules(vec![rule("r1", delta_above(0.5))]).await;

        engine.evaluate_at(snap(0.6), t0()).await;

        assert_eq!(broker.order_count(), 1);
        assert_eq!(sink.count(EventType::OrderPlaced), 1);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_until_expiry() {
        let (engine, broker, sink) = engine(EngineConfig::default());
        engine.set_rules(vec![rule("r1", delta_above(0.5))]).await;

        engine.evaluate_at(snap(0.6), t0()).await;
        let blocked = engine.evaluate_at(snap(0.6), t0() + Duration::seconds(299)).await;
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].event_type, EventType::CooldownBlocked);

        engine.evaluate_at(snap(0.6), t0() + Duration::seconds(300)).await;
        assert_eq!(broker.order_count(), 2);
        assert_eq!(sink.count(EventType::EntryTriggered), 2);
    }

    #[tokio::test]
    async fn test_blocked_rule_not_matching_is_silent() {
        let (engine, _broker, _sink) = engine(EngineConfig::default());
        engine.set_rules(vec![rule("r1", delta_above(0.5))]).await;

        engine.evaluate_at(snap(0.6), t0()).await;
        let events = engine.evaluate_at(snap(0.1), t0() + Duration::seconds(10)).await;

        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_exit_uses_inverse_side() {
        let (engine, broker, _sink) = engine(EngineConfig::default());
        let mut r = rule("r1", delta_above(0.5));
        r.exit = Some(ConditionGroup::all(vec![ConditionItem::leaf(
            "Delta",
            Operator::LessThan,
            0.2,
        )]));
        engine.set_rules(vec![r]).await;

        let events = engine.evaluate_at(snap(0.1), t0()).await;

        assert_eq!(events[0].event_type, EventType::ExitTriggered);
        assert_eq!(broker.orders()[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_broker_failure_still_arms_cooldown() {
        let (engine, broker, _sink) = engine(EngineConfig::default());
        engine.set_rules(vec![rule("r1", delta_above(0.5))]).await;
        broker.set_fail_next(true);

        let events = engine.evaluate_at(snap(0.6), t0()).await;
        assert_eq!(events[1].event_type, EventType::OrderFailed);

        let again = engine.evaluate_at(snap(0.6), t0() + Duration::seconds(60)).await;
        assert_eq!(again[0].event_type, EventType::CooldownBlocked);
        assert_eq!(broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_safety_violation_emits_failure_without_broker_call() {
        let (engine, broker, _sink) = engine(EngineConfig::default());
        let mut r = rule("r1", delta_above(0.5));
        r.order.qty = dec!(1001);
        engine.set_rules(vec![r]).await;

        let events = engine.evaluate_at(snap(0.6), t0()).await;

        assert_eq!(events[1].event_type, EventType::OrderFailed);
        assert!(events[1].detail.as_deref().unwrap().contains("max order quantity"));
        assert_eq!(broker.order_count(), 0);
        assert_eq!(engine.status().await.session_orders, 0);
    }

    #[tokio::test]
    async fn test_daily_loss_blocks_buys_only() {
        let (engine, broker, _sink) = engine(EngineConfig::default());
        broker.set_unrealized_pl(dec!(-5000));

        let mut sell = rule("r-sell", delta_above(0.5));
        sell.order.side = OrderSide::Sell;
        engine.set_rules(vec![rule("r-buy", delta_above(0.5)), sell]).await;

        let events = engine.evaluate_at(snap(0.6), t0()).await;
        let failed: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::OrderFailed)
            .collect();

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].rule_id, "r-buy");
        assert_eq!(broker.orders()[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_positions_failure_blocks_buy() {
        let (engine, broker, _sink) = engine(EngineConfig::default());
        broker.set_fail_positions(true);
        engine.set_rules(vec![rule("r1", delta_above(0.5))]).await;

        let events = engine.evaluate_at(snap(0.6), t0()).await;

        assert_eq!(events[1].event_type, EventType::OrderFailed);
        assert_eq!(broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_endpoint_guard_rejects_live_endpoint() {
        let broker = Arc::new(StubBroker::with_endpoint("https://api.live.example"));
        let sink = Arc::new(RecordingSink::new());
        let engine = SignalEngine::new(
            EngineConfig::default(),
            broker.clone(),
            sink.clone(),
            EndpointGuard::new("sandbox"),
        );
        engine.set_rules(vec![rule("r1", delta_above(0.5))]).await;

        engine.evaluate_at(snap(0.6), t0()).await;

        assert_eq!(sink.count(EventType::OrderFailed), 1);
        assert_eq!(broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_rule_without_symbol() {
        let (engine, broker, _sink) = engine(EngineConfig::default());
        let mut r = rule("r1", delta_above(0.5));
        r.symbols.clear();
        engine.set_rules(vec![r]).await;

        let events = engine.evaluate_at(snap(0.6), t0()).await;

        assert_eq!(events[0].event_type, EventType::EntryTriggered);
        assert_eq!(events[1].event_type, EventType::OrderFailed);
        assert_eq!(events[1].detail.as_deref(), Some("no symbol"));
        assert_eq!(broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_paused_rules_are_skipped() {
        let (engine, broker, _sink) = engine(EngineConfig::default());
        let mut r = rule("r1", delta_above(0.5));
        r.status = RuleStatus::Paused;
        engine.set_rules(vec![r]).await;

        assert!(engine.evaluate_at(snap(0.6), t0()).await.is_empty());
        assert_eq!(broker.order_count(), 0);

        let status = engine.status().await;
        assert_eq!(status.rules_total, 1);
        assert_eq!(status.rules_paused, 1);
        assert_eq!(status.rules_active, 0);
    }

    #[tokio::test]
    async fn test_previous_snapshot_shared_within_cycle() {
        let (engine, _broker, sink) = engine(EngineConfig::default());
        let cross = |id: &str| {
            rule(
                id,
                ConditionGroup::all(vec![ConditionItem::leaf("Delta", Operator::CrossesAbove, 0.5)]),
            )
        };
        engine.set_rules(vec![cross("a"), cross("b")]).await;

        // First snapshot: no previous, cross cannot fire
        assert!(engine.evaluate_at(snap(0.6), t0()).await.is_empty());

        engine.evaluate_at(snap(0.4), t0() + Duration::seconds(1)).await;
        engine.evaluate_at(snap(0.7), t0() + Duration::seconds(2)).await;

        assert_eq!(sink.count(EventType::EntryTriggered), 2);
    }
}
