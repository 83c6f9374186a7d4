// src/rules/mod.rs

//! Rules engine
//!
//! User-authored condition/action rules, evaluated once per introspection
//! run against the fetched fleet node and the inventory payload. Matching
//! rules translate their actions into patch operations, appended in rule
//! order after all hook-derived patches.
//!
//! Conditions address data through scheme-prefixed field paths:
//! `node://extra/deployed` resolves into the fleet node document,
//! `data://interfaces/em1/mac` into the payload. Rules never see the
//! effects of other rules within a run: every condition is evaluated
//! against the snapshot taken before the first rule.
//!
//! A malformed rule (unknown operator, bad field path, bad regex) fails
//! only itself: it is logged and skipped, and the remaining rules still
//! run. Strict mode turns that into a run-aborting error instead.

use crate::error::{Error, Result};
use crate::fleet::FleetNode;
use crate::inventory::InventoryPayload;
use crate::patch::{PatchKind, PatchOp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

/// Condition operators. `matches` is an anchored regex match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    Matches,
    IsEmpty,
}

/// How a rule's condition results combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JoinType {
    And,
    Or,
}

/// One predicate over a field path.
///
/// The operator is kept as a string until evaluation so that a rule stored
/// with an operator this version does not know fails that rule only, not
/// the whole rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: String,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op: op.to_string(),
            value,
        }
    }
}

/// One action of a matching rule; translates 1:1 into a patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub op: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl RuleAction {
    pub fn new(op: PatchKind, path: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            op: op.to_string(),
            path: path.into(),
            value,
        }
    }
}

/// A persisted condition/action rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: Option<i64>,
    pub description: Option<String>,
    pub conditions: Vec<Condition>,
    pub conditions_join_type: JoinType,
    pub invert_conditions_outcome: bool,
    pub actions: Vec<RuleAction>,
    pub created_at: Option<String>,
}

impl Rule {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self {
            id: None,
            description: None,
            conditions,
            conditions_join_type: JoinType::And,
            invert_conditions_outcome: false,
            actions: Vec::new(),
            created_at: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_join_type(mut self, join_type: JoinType) -> Self {
        self.conditions_join_type = join_type;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert_conditions_outcome = true;
        self
    }

    fn label(&self) -> String {
        match (&self.id, &self.description) {
            (Some(id), Some(desc)) => format!("{} ({})", id, desc),
            (Some(id), None) => id.to_string(),
            (None, Some(desc)) => desc.clone(),
            (None, None) => "<unsaved>".to_string(),
        }
    }
}

/// Evaluates a rule set against one node + payload pair.
pub struct RulesEngine {
    strict: bool,
}

impl RulesEngine {
    /// `strict` aborts the whole run on the first malformed rule instead
    /// of skipping it.
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Evaluate every rule and return the concatenated patch operations of
    /// the matching ones, in rule order.
    pub fn evaluate(
        &self,
        rules: &[Rule],
        node: &FleetNode,
        payload: &InventoryPayload,
    ) -> Result<Vec<PatchOp>> {
        // Pre-rule snapshot: one rule's actions never influence another
        // rule's conditions within the same run.
        let node_doc = node.as_json();
        let data_doc = payload.as_json();

        let mut patch = Vec::new();
        for rule in rules {
            match apply_rule(rule, &node_doc, &data_doc) {
                Ok(Some(ops)) => {
                    debug!("Rule {} matched node {}", rule.label(), node.uuid);
                    patch.extend(ops);
                }
                Ok(None) => {
                    debug!("Rule {} did not match node {}", rule.label(), node.uuid);
                }
                Err(e) if self.strict => {
                    warn!("Aborting the run on malformed rule {}", rule.label());
                    return Err(e);
                }
                Err(e) => {
                    warn!("Skipping malformed rule {}: {}", rule.label(), e);
                }
            }
        }
        Ok(patch)
    }
}

/// Evaluate one rule; `Some(ops)` when it matched.
fn apply_rule(rule: &Rule, node_doc: &Value, data_doc: &Value) -> Result<Option<Vec<PatchOp>>> {
    let mut results = Vec::with_capacity(rule.conditions.len());
    for condition in &rule.conditions {
        results.push(check_condition(condition, node_doc, data_doc)?);
    }

    // A rule with no conditions always matches.
    let mut matched = match rule.conditions_join_type {
        JoinType::And => results.iter().all(|r| *r),
        JoinType::Or => !results.is_empty() && results.iter().any(|r| *r),
    };
    if rule.conditions.is_empty() {
        matched = true;
    }
    if rule.invert_conditions_outcome {
        matched = !matched;
    }

    if !matched {
        return Ok(None);
    }

    let ops = rule
        .actions
        .iter()
        .map(|action| {
            let op = PatchKind::from_str(&action.op).map_err(|_| {
                Error::RuleError(format!("unknown action operation '{}'", action.op))
            })?;
            Ok(PatchOp {
                op,
                path: action.path.clone(),
                value: action.value.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(ops))
}

fn check_condition(condition: &Condition, node_doc: &Value, data_doc: &Value) -> Result<bool> {
    let op = ConditionOp::from_str(&condition.op)
        .map_err(|_| Error::RuleError(format!("unknown condition operator '{}'", condition.op)))?;
    let actual = resolve_field(&condition.field, node_doc, data_doc)?;
    let expected = &condition.value;

    let result = match op {
        ConditionOp::IsEmpty => is_empty(actual),
        ConditionOp::Eq => actual.map(|a| loosely_equal(a, expected)).unwrap_or(false),
        ConditionOp::Ne => actual.map(|a| !loosely_equal(a, expected)).unwrap_or(false),
        ConditionOp::Lt | ConditionOp::Le | ConditionOp::Gt | ConditionOp::Ge => {
            let Some(actual) = actual else {
                return Ok(false);
            };
            let ordering = compare(actual, expected).ok_or_else(|| {
                Error::RuleError(format!(
                    "operator '{}' cannot compare {} with {}",
                    op, actual, expected
                ))
            })?;
            matches!(
                (op, ordering),
                (ConditionOp::Lt, std::cmp::Ordering::Less)
                    | (ConditionOp::Le, std::cmp::Ordering::Less)
                    | (ConditionOp::Le, std::cmp::Ordering::Equal)
                    | (ConditionOp::Gt, std::cmp::Ordering::Greater)
                    | (ConditionOp::Ge, std::cmp::Ordering::Greater)
                    | (ConditionOp::Ge, std::cmp::Ordering::Equal)
            )
        }
        ConditionOp::Contains => match actual {
            Some(Value::String(s)) => {
                let needle = expected.as_str().ok_or_else(|| {
                    Error::RuleError("'contains' on a string needs a string value".to_string())
                })?;
                s.contains(needle)
            }
            Some(Value::Array(items)) => items.iter().any(|item| loosely_equal(item, expected)),
            Some(other) => {
                return Err(Error::RuleError(format!(
                    "'contains' cannot search inside {}",
                    other
                )));
            }
            None => false,
        },
        ConditionOp::Matches => {
            let pattern = expected.as_str().ok_or_else(|| {
                Error::RuleError("'matches' needs a string regular expression".to_string())
            })?;
            let re = regex::Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| Error::RuleError(format!("bad regular expression: {}", e)))?;
            match actual {
                Some(Value::String(s)) => re.is_match(s),
                _ => false,
            }
        }
    };

    Ok(result)
}

/// Resolve a `node://` or `data://` field path to a value in the matching
/// document. Missing path segments resolve to `None`, which is falsy for
/// every operator except `is-empty`.
fn resolve_field<'a>(
    field: &str,
    node_doc: &'a Value,
    data_doc: &'a Value,
) -> Result<Option<&'a Value>> {
    let (doc, path) = if let Some(path) = field.strip_prefix("node://") {
        (node_doc, path)
    } else if let Some(path) = field.strip_prefix("data://") {
        (data_doc, path)
    } else {
        return Err(Error::RuleError(format!(
            "field path '{}' must start with node:// or data://",
            field
        )));
    };

    let mut current = doc;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Equality with numeric coercion, so `2` and `2.0` compare equal.
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

/// Order two values: numerically when both are numbers, lexicographically
/// when both are strings.
fn compare(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (actual.as_str(), expected.as_str()) {
        return Some(a.cmp(b));
    }
    None
}
