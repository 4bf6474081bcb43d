//! Value Objects for the Tripwire Domain
//!
//! Small enumerations shared by rule documents, position events and
//! order requests. All of them serialize to the lowercase wire names
//! used in rule files and stream frames.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for document and value validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Rule document failed validation
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Condition tree failed validation
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Order parameters failed validation
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Position filter failed validation
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Unknown enumeration value
    #[error("Unknown {kind}: {value}")]
    UnknownValue {
        /// Which enumeration was being parsed
        kind: &'static str,
        /// The offending input
        value: String,
    },
}

impl DomainError {
    fn unknown(kind: &'static str, value: &str) -> Self {
        Self::UnknownValue {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// OrderSide
// =============================================================================

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened with `self`.
    pub fn inverse(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Wire name ("buy" / "sell")
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "buy_to_open" | "buy_to_close" => Ok(OrderSide::Buy),
            "sell" | "sell_to_open" | "sell_to_close" => Ok(OrderSide::Sell),
            other => Err(DomainError::unknown("order side", other)),
        }
    }
}

// =============================================================================
// OrderType
// =============================================================================

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Market order
    #[default]
    Market,
    /// Limit order
    Limit,
    /// Stop order
    Stop,
    /// Stop-limit order
    StopLimit,
}

impl OrderType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }

    /// Whether this order type carries a limit price.
    pub fn needs_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    /// Whether this order type carries a stop price.
    pub fn needs_stop_price(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop" => Ok(OrderType::Stop),
            "stop_limit" | "stoplimit" | "stop-limit" => Ok(OrderType::StopLimit),
            other => Err(DomainError::unknown("order type", other)),
        }
    }
}

// =============================================================================
// TimeInForce
// =============================================================================

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    /// Good for the trading day
    #[default]
    Day,
    /// Good till cancelled
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Fill or kill
    Fok,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Fok => "fok",
        };
        f.write_str(s)
    }
}

// =============================================================================
// RuleStatus
// =============================================================================

/// Lifecycle status of a rule document.
///
/// Only `Active` rules are loaded into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Evaluated on every snapshot
    #[default]
    Active,
    /// Kept on disk, skipped by the engine
    Paused,
    /// Kept on disk, skipped by the engine
    Disabled,
}

impl RuleStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Active => "active",
            RuleStatus::Paused => "paused",
            RuleStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(RuleStatus::Active),
            "paused" => Ok(RuleStatus::Paused),
            "disabled" => Ok(RuleStatus::Disabled),
            other => Err(DomainError::unknown("rule status", other)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
