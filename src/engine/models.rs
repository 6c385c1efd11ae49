// Domain types for the reward rule engine
// Mirrors the wire format accepted by the rules API and stored as JSONB

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A declarative reward rule.
///
/// The header gate runs against the whole order document; item rewards run
/// against each order item. A rule with `maximum = true` competes in the
/// max pool instead of the sum pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Nil on create requests; the store assigns a fresh id.
    #[serde(default)]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub maximum: bool,
    pub header: RewardCriteria,
    #[serde(default)]
    pub items: Vec<RewardCriteria>,
}

/// A gate plus a points formula.
///
/// When `percent` is non-zero it takes precedence over `points` and the
/// award is the ceiling of `reference * percent / 100`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewardCriteria {
    #[serde(default)]
    pub points: i32,
    #[serde(default)]
    pub percent: i32,
    /// Must be non-empty for any gate that is evaluated.
    #[serde(default)]
    pub include: Vec<Criteria>,
    #[serde(default)]
    pub exclude: Vec<Criteria>,
}

/// A boolean combinator over a list of conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criteria {
    pub operator: CriteriaOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A single field test against the order document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Top-level key in the data map; dotted paths are not supported.
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriteriaOperator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl fmt::Display for CriteriaOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriteriaOperator::And => write!(f, "AND"),
            CriteriaOperator::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ConditionOperator::Eq => "=",
            ConditionOperator::Ne => "!=",
            ConditionOperator::Lt => "<",
            ConditionOperator::Le => "<=",
            ConditionOperator::Gt => ">",
            ConditionOperator::Ge => ">=",
        };
        write!(f, "{}", symbol)
    }
}
