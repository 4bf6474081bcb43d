//! E2E tests: rule documents and position batches driven through the
//! SignalEngine against the stub broker.
//!
//! Flow:
//! 1. Parse rule documents the way the store hands them over
//! 2. Feed snapshots / position batches
//! 3. Verify emitted events and what reached the broker

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use tripwire_domain::{EventType, OrderSide, PositionEvent, PositionFilter, Rule, Snapshot};
use tripwire_exec::{EndpointGuard, EngineConfig, RecordingSink, SignalEngine, StubBroker};

// =============================================================================
// Helpers
// =============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
}

fn setup(config: EngineConfig) -> (SignalEngine, Arc<StubBroker>, Arc<RecordingSink>) {
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

fn delta_gamma_rule(id: &str) -> Rule {
    let mut rule: Rule = serde_json::from_value(serde_json::json!({
        "rule_id": id,
        "name": format!("delta gamma {}", id),
        "symbols": ["SPY"],
        "entry": { "all_of": [
            { "kpi": "Delta", "operator": ">", "value": 0.5 },
            { "kpi": "Gamma", "operator": "<", "value": 0.1 }
        ] },
        "order": { "side": "buy", "type": "market", "qty": 1, "tif": "day" },
        "cooldown": 300
    }))
    .unwrap();
    rule.normalize("alice");
    rule.validate().unwrap();
    rule
}

fn snapshot(at: DateTime<Utc>) -> Snapshot {
    Snapshot::new("stream", at)
        .with_kpi("Delta", 0.6)
        .with_kpi("Gamma", 0.05)
}

fn position(id: &str, status: &str, side: &str) -> PositionEvent {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "underlying": "QQQ",
        "quantity": 1,
        "entry_side": side,
        "entry_type": "market",
        "exit_side": side,
        "delta": -0.3,
        "trade_status": status,
    }))
    .unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_dry_run_emits_trigger_without_orders() {
    let config = EngineConfig {
        dry_run: true,
        ..EngineConfig::default()
    };
    let (engine, broker, sink) = setup(config);
    engine.set_rules(vec![delta_gamma_rule("r1")]).await;

    engine.evaluate_at(snapshot(t0()), t0()).await;

    assert_eq!(sink.count(EventType::EntryTriggered), 1);
    assert_eq!(sink.count(EventType::OrderPlaced), 0);
    assert_eq!(broker.order_count(), 0);
    assert_eq!(engine.status().await.session_orders, 0);
}

#[tokio::test]
async fn test_session_cap_limits_submitted_orders() {
    let config = EngineConfig {
        max_orders_per_session: 2,
        ..EngineConfig::default()
    };
    let (engine, broker, sink) = setup(config);
    engine
        .set_rules(vec![
            delta_gamma_rule("r1"),
            delta_gamma_rule("r2"),
            delta_gamma_rule("r3"),
        ])
        .await;

    engine.evaluate_at(snapshot(t0()), t0()).await;

    assert_eq!(broker.order_count(), 2);
    assert_eq!(sink.count(EventType::OrderPlaced), 2);

    let blocked = sink.of_type(EventType::CooldownBlocked);
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].rule_id, "r3");
    assert!(blocked[0].detail.as_deref().unwrap().contains("session"));
}

#[tokio::test]
async fn test_hourly_cap_blocks_eleventh_match() {
    let (engine, broker, sink) = setup(EngineConfig::default());
    let mut rule = delta_gamma_rule("r1");
    rule.cooldown = 60;
    engine.set_rules(vec![rule]).await;

    for minute in 0..11 {
        let at = t0() + Duration::minutes(minute);
        engine.evaluate_at(snapshot(at), at).await;
    }

    assert_eq!(sink.count(EventType::EntryTriggered), 10);
    assert_eq!(broker.order_count(), 10);

    let blocked = sink.of_type(EventType::CooldownBlocked);
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].detail.as_deref().unwrap().contains("hourly"));
}

#[tokio::test]
async fn test_copy_trade_round_trip_shares_session_counter() {
    let (engine, broker, sink) = setup(EngineConfig::default());
    engine
        .set_filter(PositionFilter {
            enabled: true,
            underlyings: vec!["qqq".to_string()],
            max_delta: Some(0.5),
            ..PositionFilter::default()
        })
        .await;
    engine.set_rules(vec![delta_gamma_rule("r1")]).await;

    engine.evaluate_at(snapshot(t0()), t0()).await;
    engine
        .process_position_events(vec![
            position("x-1", "active", "sell"),
            position("x-1", "active", "sell"),
        ])
        .await;
    engine
        .process_position_events(vec![position("x-1", "closing", "sell")])
        .await;

    let orders = broker.orders();
    assert_eq!(orders.len(), 3);
    assert_eq!(orders[1].side, OrderSide::Sell);
    assert_eq!(orders[2].side, OrderSide::Buy);
    assert_eq!(orders[2].quantity, dec!(1));

    assert_eq!(engine.status().await.session_orders, 3);
    assert_eq!(engine.status().await.tracked_positions, 0);

    let placed = sink.of_type(EventType::OrderPlaced);
    assert_eq!(placed[1].rule_id, "position:x-1");
}

#[tokio::test]
async fn test_journal_records_every_submission() {
    let (engine, broker, _sink) = setup(EngineConfig::default());
    engine.set_rules(vec![delta_gamma_rule("r1")]).await;
    broker.set_fail_next(true);

    engine.evaluate_at(snapshot(t0()), t0()).await;

    let journal = engine.journal();
    let entries = journal.get_by_source("r1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, tripwire_exec::SubmissionStatus::Failed);
    assert_eq!(
        entries[0].client_order_id,
        format!("rule-r1-{}", t0().timestamp_millis())
    );
}
