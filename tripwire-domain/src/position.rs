//! Copy-trade inputs: externally-sourced position events and the filter
//! deciding which of them are mirrored.

use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value_objects::{DomainError, OrderSide, OrderType};

// =============================================================================
// TradeStatus
// =============================================================================

/// Lifecycle status of a foreign trade leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Position opened upstream: mirror the entry
    Active,
    /// Position being closed upstream: mirror the exit
    Closing,
    /// Position closed upstream: forget it
    Closed,
    /// Position withdrawn upstream: forget it
    Deprecated,
    /// Anything else the source may send
    #[serde(other)]
    Unknown,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::Active => "active",
            TradeStatus::Closing => "closing",
            TradeStatus::Closed => "closed",
            TradeStatus::Deprecated => "deprecated",
            TradeStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// =============================================================================
// PositionEvent
// =============================================================================

/// An externally-sourced trade leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    /// Identifier assigned by the source system
    #[serde(alias = "id")]
    pub external_id: String,
    /// Underlying instrument (e.g. "SPY")
    pub underlying: String,
    /// Traded contract, when different from the underlying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Strategy label (e.g. "iron_condor")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Option type label (e.g. "call", "put")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_type: Option<String>,
    /// Source quantity (1 when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,

    /// Side used by the source to open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_side: Option<OrderSide>,
    /// Order type used by the source to open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<OrderType>,
    /// Price used by the source to open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<Decimal>,

    /// Side reported by the source on close (informational only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_side: Option<OrderSide>,
    /// Order type used by the source to close
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_type: Option<OrderType>,
    /// Price used by the source to close
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<Decimal>,

    /// Delta of the leg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// Gamma of the leg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    /// Theta of the leg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theta: Option<f64>,
    /// Vega of the leg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vega: Option<f64>,

    /// Lifecycle status
    pub trade_status: TradeStatus,
}

impl PositionEvent {
    /// Instrument the mirrored order is placed on.
    pub fn symbol(&self) -> &str {
        self.contract.as_deref().unwrap_or(&self.underlying)
    }

    /// Identifier used in event records (`position:<external id>`).
    pub fn record_id(&self) -> String {
        format!("position:{}", self.external_id)
    }
}

// =============================================================================
// PositionFilter
// =============================================================================

fn default_scale_factor() -> Decimal {
    Decimal::ONE
}

/// Selects which position events are mirrored and how they are sized.
///
/// A disabled filter matches nothing. Empty allow-lists match everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFilter {
    /// Master switch
    #[serde(default)]
    pub enabled: bool,
    /// Allowed underlyings (case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub underlyings: Vec<String>,
    /// Allowed strategy labels (case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strategies: Vec<String>,
    /// Allowed option types (case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub option_types: Vec<String>,
    /// Inclusive lower bound on |delta|
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_delta: Option<f64>,
    /// Inclusive upper bound on |delta|
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delta: Option<f64>,
    /// Upper bound on the mirrored quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_qty: Option<Decimal>,
    /// Replaces the source entry order type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_type_override: Option<OrderType>,
    /// Multiplier applied to the source quantity
    #[serde(default = "default_scale_factor")]
    pub scale_factor: Decimal,
}

impl Default for PositionFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            underlyings: Vec::new(),
            strategies: Vec::new(),
            option_types: Vec::new(),
            min_delta: None,
            max_delta: None,
            max_qty: None,
            order_type_override: None,
            scale_factor: default_scale_factor(),
        }
    }
}

fn allowed(list: &[String], value: Option<&str>) -> bool {
    if list.is_empty() {
        return true;
    }
    match value {
        Some(v) => list.iter().any(|item| item.eq_ignore_ascii_case(v)),
        None => false,
    }
}

impl PositionFilter {
    /// Whether `event` passes the filter.
    pub fn matches(&self, event: &PositionEvent) -> bool {
        if !self.enabled {
            return false;
        }
        if !allowed(&self.underlyings, Some(&event.underlying)) {
            return false;
        }
        if !allowed(&self.strategies, event.strategy.as_deref()) {
            return false;
        }
        if !allowed(&self.option_types, event.option_type.as_deref()) {
            return false;
        }

        if self.min_delta.is_some() || self.max_delta.is_some() {
            let delta = match event.delta {
                Some(d) => d.abs(),
                None => return false,
            };
            if self.min_delta.is_some_and(|min| delta < min) {
                return false;
            }
            if self.max_delta.is_some_and(|max| delta > max) {
                return false;
            }
        }

        true
    }

    /// Mirrored quantity: source quantity × scale factor, rounded to whole
    /// units (at least one), clamped to `max_qty`.
    ///
    /// `None` when the product overflows.
    pub fn scaled_quantity(&self, event: &PositionEvent) -> Option<Decimal> {
        let base = event.quantity.unwrap_or(Decimal::ONE);
        let product = base.checked_mul(self.scale_factor)?;
        let scaled = product.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

        let qty = if scaled < Decimal::ONE && product > Decimal::ZERO {
            Decimal::ONE
        } else {
            scaled
        };

        Some(match self.max_qty {
            Some(max) if qty > max => max,
            _ => qty,
        })
    }

    /// Validate the filter document.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.scale_factor <= Decimal::ZERO {
            return Err(DomainError::InvalidFilter(format!(
                "scale_factor must be positive, got {}",
                self.scale_factor
            )));
        }
        if let (Some(min), Some(max)) = (self.min_delta, self.max_delta) {
            if min > max {
                return Err(DomainError::InvalidFilter(format!(
                    "min_delta {} exceeds max_delta {}",
                    min, max
                )));
            }
        }
        if self.max_qty.is_some_and(|max| max <= Decimal::ZERO) {
            return Err(DomainError::InvalidFilter("max_qty must be positive".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
