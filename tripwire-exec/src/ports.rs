//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (broker, credential
//! vault). Adapters implement these ports for specific services (stub,
//! a real brokerage client living outside this workspace).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use tripwire_domain::{Credentials, OrderRequest};

use crate::error::ExecError;

// =============================================================================
// Broker Port
// =============================================================================

/// Port for brokerage operations.
///
/// Implementations:
/// - `StubBroker` - For development and tests (accepts every order)
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Establish (or verify) the session with the broker.
    async fn connect(&self) -> Result<(), ExecError>;

    /// Current open positions with their unrealized P&L.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, ExecError>;

    /// Submit an order.
    ///
    /// # Arguments
    ///
    /// * `request` - Order to submit; `client_order_id` is the idempotency key
    ///
    /// # Returns
    ///
    /// `OrderResult` with the broker-assigned order id on acceptance.
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResult, ExecError>;

    /// Subscribe to order status updates.
    async fn stream_updates(&self) -> Result<mpsc::Receiver<OrderUpdate>, ExecError>;

    /// Base URL every call is sent to. Checked against the endpoint guard
    /// before each submission.
    fn endpoint(&self) -> &str;
}

/// Open position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Instrument
    pub symbol: String,
    /// Signed quantity
    pub quantity: Decimal,
    /// Unrealized profit (negative = loss)
    pub unrealized_pl: Decimal,
}

/// Result of an accepted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    /// Broker-assigned order ID
    pub order_id: String,
    /// Client-provided order ID (for idempotency)
    pub client_order_id: String,
    /// Broker status string (e.g. "accepted", "filled")
    pub status: String,
    /// When the broker acknowledged the order
    pub submitted_at: DateTime<Utc>,
}

/// Order status change pushed by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Broker order id
    pub order_id: String,
    /// New status
    pub status: String,
    /// Quantity filled so far
    pub filled_qty: Decimal,
    /// Update timestamp
    pub timestamp: DateTime<Utc>,
}

/// Sum of unrealized P&L across positions, `None` on overflow.
pub fn aggregate_unrealized_pl(positions: &[BrokerPosition]) -> Option<Decimal> {
    positions
        .iter()
        .try_fold(Decimal::ZERO, |total, p| total.checked_add(p.unrealized_pl))
}

// =============================================================================
// Credential Port
// =============================================================================

/// Opaque "load credentials" capability backed by an external vault.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Load (decrypt) the credentials.
    async fn load(&self) -> Result<Credentials, ExecError>;
}

/// Credentials known up front (environment, tests).
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn load(&self) -> Result<Credentials, ExecError> {
        if self.0.token().is_empty() {
            return Err(ExecError::Credentials("empty token".to_string()));
        }
        Ok(self.0.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
