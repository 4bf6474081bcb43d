//! Stub broker for development and tests.
//!
//! Accepts every order immediately without any network call, records what
//! it was sent, and can be told to fail or to report a given P&L.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use tripwire_domain::OrderRequest;

use crate::error::ExecError;
use crate::ports::{BrokerPort, BrokerPosition, OrderResult, OrderUpdate};

/// Default endpoint reported by the stub; passes the default guard.
pub const STUB_ENDPOINT: &str = "https://sandbox.stub.local";

#[derive(Default)]
struct StubState {
    orders: Vec<OrderRequest>,
    positions: Vec<BrokerPosition>,
    order_counter: u64,
    fail_next: bool,
    fail_positions: bool,
    connected: bool,
    updates: Option<mpsc::Sender<OrderUpdate>>,
}

/// In-memory broker.
pub struct StubBroker {
    endpoint: String,
    state: Mutex<StubState>,
}

impl StubBroker {
    /// Stub reporting [`STUB_ENDPOINT`].
    pub fn new() -> Self {
        Self::with_endpoint(STUB_ENDPOINT)
    }

    /// Stub reporting a custom endpoint (guard tests).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: Mutex::new(StubState::default()),
        }
    }

    /// Configure the next order to fail.
    pub fn set_fail_next(&self, fail: bool) {
        self.lock().fail_next = fail;
    }

    /// Make `get_positions` fail until reset.
    pub fn set_fail_positions(&self, fail: bool) {
        self.lock().fail_positions = fail;
    }

    /// Replace the reported positions.
    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        self.lock().positions = positions;
    }

    /// Report a single position carrying the given unrealized P&L.
    pub fn set_unrealized_pl(&self, pl: Decimal) {
        self.set_positions(vec![BrokerPosition {
            symbol: "STUB".to_string(),
            quantity: Decimal::ONE,
            unrealized_pl: pl,
        }]);
    }

    /// Orders accepted so far.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.lock().orders.clone()
    }

    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StubBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerPort for StubBroker {
    async fn connect(&self) -> Result<(), ExecError> {
        self.lock().connected = true;
        tracing::debug!(endpoint = %self.endpoint, "Stub: connected");
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, ExecError> {
        let state = self.lock();
        if state.fail_positions {
            return Err(ExecError::Broker("Simulated positions failure".to_string()));
        }
        Ok(state.positions.clone())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResult, ExecError> {
        let mut state = self.lock();

        if state.fail_next {
            state.fail_next = false;
            return Err(ExecError::OrderRejected("Simulated broker rejection".to_string()));
        }

        state.order_counter += 1;
        let order_id = format!("STUB-{}", state.order_counter);
        state.orders.push(request.clone());

        let now = Utc::now();
        if let Some(tx) = &state.updates {
            // Subscriber may have gone away
            let _ = tx.try_send(OrderUpdate {
                order_id: order_id.clone(),
                status: "filled".to_string(),
                filled_qty: request.quantity,
                timestamp: now,
            });
        }

        Ok(OrderResult {
            order_id,
            client_order_id: request.client_order_id.clone(),
            status: "accepted".to_string(),
            submitted_at: now,
        })
    }

    async fn stream_updates(&self) -> Result<mpsc::Receiver<OrderUpdate>, ExecError> {
        let (tx, rx) = mpsc::channel(100);
        self.lock().updates = Some(tx);
        Ok(rx)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tripwire_domain::{OrderSide, OrderType, TimeInForce};

    fn request(id: &str) -> OrderRequest {
        OrderRequest {
            symbol: "SPY".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: dec!(3),
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            client_order_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_stub_broker_accepts_and_records() {
        let broker = StubBroker::new();
        broker.connect().await.unwrap();

        let result = broker.create_order(&request("c-1")).await.unwrap();

        assert!(broker.is_connected());
        assert_eq!(result.order_id, "STUB-1");
        assert_eq!(result.client_order_id, "c-1");
        assert_eq!(broker.order_count(), 1);
    }

    #[tokio::test]
    async fn test_stub_broker_simulated_failure() {
        let broker = StubBroker::new();
        broker.set_fail_next(true);

        assert!(broker.create_order(&request("fail-1")).await.is_err());
        assert!(broker.create_order(&request("ok-1")).await.is_ok());
        assert_eq!(broker.order_count(), 1);
    }

    #[tokio::test]
    async fn test_stub_broker_positions() {
        let broker = StubBroker::new();
        broker.set_unrealized_pl(dec!(-42));

        let positions = broker.get_positions().await.unwrap();
        assert_eq!(positions[0].unrealized_pl, dec!(-42));

        broker.set_fail_positions(true);
        assert!(broker.get_positions().await.is_err());
    }

    #[tokio::test]
    async fn test_stub_broker_streams_updates() {
        let broker = StubBroker::new();
        let mut rx = broker.stream_updates().await.unwrap();

        broker.create_order(&request("c-1")).await.unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.order_id, "STUB-1");
        assert_eq!(update.filled_qty, dec!(3));
    }
}
