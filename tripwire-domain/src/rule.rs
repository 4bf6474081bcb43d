//! Rule documents.
//!
//! A rule is a declarative document: an `entry` condition group, an
//! optional `exit` group and the order to submit when either matches.
//! Condition groups form an AND/OR tree whose leaves compare a named
//! KPI against a threshold.
//!
//! # Document shape
//!
//! ```json
//! {
//!   "rule_id": "3f0c9a51d2e4b7a8",
//!   "name": "delta hedge",
//!   "status": "active",
//!   "symbols": ["SPY"],
//!   "entry": { "all_of": [
//!       { "kpi": "Delta", "operator": ">", "value": 0.5 },
//!       { "any_of": [ { "kpi": "Gamma", "operator": "<", "value": 0.1 } ] }
//!   ] },
//!   "order": { "side": "buy", "type": "market", "qty": 1, "tif": "day" },
//!   "cooldown": 300
//! }
//! ```

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::value_objects::{DomainError, OrderSide, OrderType, RuleStatus, TimeInForce};

/// Minimum cooldown between two triggers of the same rule.
pub const MIN_COOLDOWN_SECS: u64 = 60;

/// Maximum nesting depth accepted for a condition tree (root group = 1).
pub const MAX_CONDITION_DEPTH: usize = 8;

// =============================================================================
// Operator
// =============================================================================

/// Comparison operator of a condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// current > threshold
    #[serde(rename = ">")]
    GreaterThan,
    /// current < threshold
    #[serde(rename = "<")]
    LessThan,
    /// current >= threshold
    #[serde(rename = ">=")]
    GreaterOrEqual,
    /// current <= threshold
    #[serde(rename = "<=")]
    LessOrEqual,
    /// |current - threshold| < epsilon
    #[serde(rename = "==")]
    Equal,
    /// |current - threshold| >= epsilon
    #[serde(rename = "!=")]
    NotEqual,
    /// previous <= threshold and current > threshold
    #[serde(rename = "crosses_above")]
    CrossesAbove,
    /// previous >= threshold and current < threshold
    #[serde(rename = "crosses_below")]
    CrossesBelow,
}

impl Operator {
    /// Whether the operator compares two consecutive snapshots.
    pub fn is_edge_triggered(&self) -> bool {
        matches!(self, Operator::CrossesAbove | Operator::CrossesBelow)
    }

    /// Wire symbol
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::CrossesAbove => "crosses_above",
            Operator::CrossesBelow => "crosses_below",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Condition tree
// =============================================================================

/// Leaf comparison: `<kpi> <operator> <value>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// KPI name looked up in the snapshot
    pub kpi: String,
    /// Comparison operator
    pub operator: Operator,
    /// Threshold
    pub value: f64,
}

impl Condition {
    /// Create a new leaf condition.
    pub fn new(kpi: impl Into<String>, operator: Operator, value: f64) -> Self {
        Self {
            kpi: kpi.into(),
            operator,
            value,
        }
    }
}

/// One entry of a condition group: either a leaf or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionItem {
    /// Leaf comparison
    Leaf(Condition),
    /// Nested AND/OR group
    Group(ConditionGroup),
}

impl ConditionItem {
    /// Shorthand for a leaf item.
    pub fn leaf(kpi: impl Into<String>, operator: Operator, value: f64) -> Self {
        ConditionItem::Leaf(Condition::new(kpi, operator, value))
    }
}

impl From<Condition> for ConditionItem {
    fn from(condition: Condition) -> Self {
        ConditionItem::Leaf(condition)
    }
}

impl From<ConditionGroup> for ConditionItem {
    fn from(group: ConditionGroup) -> Self {
        ConditionItem::Group(group)
    }
}

/// AND/OR group. Exactly one of `all_of` / `any_of` must be populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    /// Conjunction of items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_of: Option<Vec<ConditionItem>>,
    /// Disjunction of items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_of: Option<Vec<ConditionItem>>,
}

/// Resolved shape of a group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupKind<'a> {
    /// `all_of` populated
    All(&'a [ConditionItem]),
    /// `any_of` populated
    Any(&'a [ConditionItem]),
    /// Both populated, or neither
    Malformed,
}

impl ConditionGroup {
    /// Group matching when every item matches.
    pub fn all(items: Vec<ConditionItem>) -> Self {
        Self {
            all_of: Some(items),
            any_of: None,
        }
    }

    /// Group matching when any item matches.
    pub fn any(items: Vec<ConditionItem>) -> Self {
        Self {
            all_of: None,
            any_of: Some(items),
        }
    }

    /// Resolve which list is in effect. An empty list counts as absent.
    pub fn kind(&self) -> GroupKind<'_> {
        let all = self.all_of.as_deref().filter(|items| !items.is_empty());
        let any = self.any_of.as_deref().filter(|items| !items.is_empty());

        match (all, any) {
            (Some(items), None) => GroupKind::All(items),
            (None, Some(items)) => GroupKind::Any(items),
            _ => GroupKind::Malformed,
        }
    }

    /// Validate the tree: group exclusivity, leaf contents, nesting depth.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<(), DomainError> {
        if depth > MAX_CONDITION_DEPTH {
            return Err(DomainError::InvalidCondition(format!(
                "nesting depth exceeds {}",
                MAX_CONDITION_DEPTH
            )));
        }

        let items = match self.kind() {
            GroupKind::All(items) | GroupKind::Any(items) => items,
            GroupKind::Malformed => {
                return Err(DomainError::InvalidCondition(
                    "group must populate exactly one of all_of / any_of".to_string(),
                ))
            }
        };

        for item in items {
            match item {
                ConditionItem::Leaf(leaf) => {
                    if leaf.kpi.trim().is_empty() {
                        return Err(DomainError::InvalidCondition("empty kpi name".to_string()));
                    }
                    if !leaf.value.is_finite() {
                        return Err(DomainError::InvalidCondition(format!(
                            "non-finite threshold for {}",
                            leaf.kpi
                        )));
                    }
                }
                ConditionItem::Group(group) => group.validate_at(depth + 1)?,
            }
        }

        Ok(())
    }

    /// Depth of the deepest nested group (root = 1).
    pub fn depth(&self) -> usize {
        let items = self
            .all_of
            .iter()
            .chain(self.any_of.iter())
            .flat_map(|items| items.iter());

        1 + items
            .filter_map(|item| match item {
                ConditionItem::Group(group) => Some(group.depth()),
                ConditionItem::Leaf(_) => None,
            })
            .max()
            .unwrap_or(0)
    }
}

// =============================================================================
// Order parameters
// =============================================================================

/// Order submitted when a rule triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    /// Buy or sell
    pub side: OrderSide,
    /// Order type
    #[serde(rename = "type", default)]
    pub order_type: OrderType,
    /// Quantity (must be > 0)
    pub qty: Decimal,
    /// Time in force
    #[serde(default)]
    pub tif: TimeInForce,
    /// Limit price for limit / stop-limit orders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Stop price for stop / stop-limit orders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
}

impl OrderParams {
    /// Validate quantity and the prices required by the order type.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.qty <= Decimal::ZERO {
            return Err(DomainError::InvalidOrder(format!(
                "qty must be positive, got {}",
                self.qty
            )));
        }
        if self.order_type.needs_limit_price() && self.limit_price.is_none() {
            return Err(DomainError::InvalidOrder(format!(
                "{} order requires limit_price",
                self.order_type
            )));
        }
        if self.order_type.needs_stop_price() && self.stop_price.is_none() {
            return Err(DomainError::InvalidOrder(format!(
                "{} order requires stop_price",
                self.order_type
            )));
        }
        for price in self.limit_price.iter().chain(self.stop_price.iter()) {
            if *price <= Decimal::ZERO {
                return Err(DomainError::InvalidOrder(format!(
                    "price must be positive, got {}",
                    price
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A trigger rule document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Document version
    #[serde(default)]
    pub version: u32,
    /// Stable identifier (derived from owner + name when absent)
    #[serde(default)]
    pub rule_id: String,
    /// Human-readable name
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: RuleStatus,
    /// Instruments the order applies to (first one is traded)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
    /// Entry conditions (required)
    pub entry: ConditionGroup,
    /// Exit conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ConditionGroup>,
    /// Order to submit on trigger
    pub order: OrderParams,
    /// Seconds of silence after a trigger
    #[serde(default)]
    pub cooldown: u64,
}

impl Rule {
    /// Fill server-side defaults. Returns `true` if anything changed.
    ///
    /// Applying this twice is a no-op, so a normalized document that is
    /// saved and reloaded comes back unchanged.
    pub fn normalize(&mut self, owner: &str) -> bool {
        let mut changed = false;

        if self.rule_id.trim().is_empty() {
            self.rule_id = derive_rule_id(owner, &self.name);
            changed = true;
        }
        if self.cooldown < MIN_COOLDOWN_SECS {
            self.cooldown = MIN_COOLDOWN_SECS;
            changed = true;
        }
        if self.version == 0 {
            self.version = 1;
            changed = true;
        }

        changed
    }

    /// Validate the whole document.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidRule("name is required".to_string()));
        }
        if self.rule_id.trim().is_empty() {
            return Err(DomainError::InvalidRule(format!("rule '{}' has no id", self.name)));
        }
        // Ids double as file names
        if !self
            .rule_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidRule(format!(
                "rule id '{}' may only contain letters, digits, '-' and '_'",
                self.rule_id
            )));
        }
        if self.cooldown < MIN_COOLDOWN_SECS {
            return Err(DomainError::InvalidRule(format!(
                "cooldown must be at least {}s, got {}s",
                MIN_COOLDOWN_SECS, self.cooldown
            )));
        }

        self.entry
            .validate()
            .map_err(|e| DomainError::InvalidRule(format!("entry: {}", e)))?;
        if let Some(exit) = &self.exit {
            exit.validate()
                .map_err(|e| DomainError::InvalidRule(format!("exit: {}", e)))?;
        }

        self.order.validate()
    }

    /// Whether the engine should evaluate this rule.
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    /// Instrument the order is placed on.
    pub fn primary_symbol(&self) -> Option<&str> {
        self.symbols.first().map(String::as_str)
    }

    /// Cooldown as a duration, saturating for out-of-range values.
    pub fn cooldown_duration(&self) -> Duration {
        i64::try_from(self.cooldown.max(MIN_COOLDOWN_SECS))
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

/// Deterministic rule id: first 16 hex chars of SHA-256("owner:name").
pub fn derive_rule_id(owner: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

// =============================================================================
// Tests
// =============================================================================
