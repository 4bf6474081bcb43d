//! Condition evaluator.
//!
//! Walks a condition tree against the current snapshot and, for the
//! edge-triggered operators, the previous one. Evaluation never fails:
//! anything that cannot be decided (missing KPI, malformed group, no
//! previous snapshot for a cross) evaluates to `false`.

use serde::Serialize;
use tripwire_domain::{Condition, ConditionGroup, ConditionItem, GroupKind, Operator, Rule, Snapshot};

/// Tolerance for `==` / `!=`.
pub const EPSILON: f64 = 1e-9;

/// Evaluate a group. `all_of` short-circuits on the first false item,
/// `any_of` on the first true one; a malformed group is false.
pub fn evaluate(group: &ConditionGroup, current: &Snapshot, previous: Option<&Snapshot>) -> bool {
    match group.kind() {
        GroupKind::All(items) => items.iter().all(|item| evaluate_item(item, current, previous)),
        GroupKind::Any(items) => items.iter().any(|item| evaluate_item(item, current, previous)),
        GroupKind::Malformed => false,
    }
}

fn evaluate_item(item: &ConditionItem, current: &Snapshot, previous: Option<&Snapshot>) -> bool {
    match item {
        ConditionItem::Leaf(condition) => evaluate_condition(condition, current, previous),
        ConditionItem::Group(group) => evaluate(group, current, previous),
    }
}

/// Evaluate a single leaf.
pub fn evaluate_condition(
    condition: &Condition,
    current: &Snapshot,
    previous: Option<&Snapshot>,
) -> bool {
    let Some(value) = current.get(&condition.kpi) else {
        return false;
    };
    let threshold = condition.value;

    match condition.operator {
        Operator::GreaterThan => value > threshold,
        Operator::LessThan => value < threshold,
        Operator::GreaterOrEqual => value >= threshold,
        Operator::LessOrEqual => value <= threshold,
        Operator::Equal => (value - threshold).abs() < EPSILON,
        Operator::NotEqual => (value - threshold).abs() >= EPSILON,
        Operator::CrossesAbove => match previous.and_then(|p| p.get(&condition.kpi)) {
            Some(prev) => prev <= threshold && value > threshold,
            None => false,
        },
        Operator::CrossesBelow => match previous.and_then(|p| p.get(&condition.kpi)) {
            Some(prev) => prev >= threshold && value < threshold,
            None => false,
        },
    }
}

/// Which side of a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMatch {
    /// Entry conditions matched
    Entry,
    /// Entry did not match, exit did
    Exit,
    /// Nothing matched
    None,
}

impl RuleMatch {
    pub fn is_match(&self) -> bool {
        !matches!(self, RuleMatch::None)
    }
}

/// Dry-run a single rule: entry is checked first, exit only when entry
/// does not match. Status, cooldowns and caps are ignored.
pub fn test_rule(rule: &Rule, current: &Snapshot, previous: Option<&Snapshot>) -> RuleMatch {
    if evaluate(&rule.entry, current, previous) {
        return RuleMatch::Entry;
    }
    match &rule.exit {
        Some(exit) if evaluate(exit, current, previous) => RuleMatch::Exit,
        _ => RuleMatch::None,
    }
}
