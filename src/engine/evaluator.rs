// Condition, criteria, and reward-gate evaluation
//
// A reward fires when every include criteria holds and no exclude criterion
// does. Include and exclude run concurrently and share a cancellation
// signal so that an exclude hit stops the include side's remaining work.

use serde_json::{Map, Value};
use tokio::task::yield_now;
use tokio_util::sync::CancellationToken;

use crate::engine::comparator::{compare, Comparison};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::models::{
    Condition, ConditionOperator, Criteria, CriteriaOperator, RewardCriteria,
};

/// Top-level view of an order document or a single order item.
pub type DataMap = Map<String, Value>;

/// Evaluate one condition against a value already looked up from the data
/// map. Presence handling belongs to the caller.
fn check_condition(condition: &Condition, value: &Value) -> EngineResult<bool> {
    let result = compare(value, &condition.value).map_err(|source| EngineError::Condition {
        field: condition.field.clone(),
        operator: condition.operator,
        source,
    })?;

    Ok(match condition.operator {
        ConditionOperator::Eq => result == Comparison::Equal,
        ConditionOperator::Ne => result != Comparison::Equal,
        ConditionOperator::Gt => result == Comparison::Greater,
        ConditionOperator::Lt => result == Comparison::Less,
        ConditionOperator::Ge => matches!(result, Comparison::Equal | Comparison::Greater),
        ConditionOperator::Le => matches!(result, Comparison::Equal | Comparison::Less),
    })
}

/// Evaluate a boolean combinator over its condition list.
///
/// `AND` requires every condition field to be present and true; a missing
/// field is false, not an error. `OR` skips missing fields and
/// short-circuits on the first hit; a comparison error is deferred and only
/// surfaced when no later condition matches.
pub fn check_criteria(criteria: &Criteria, data: &DataMap) -> EngineResult<bool> {
    match criteria.operator {
        CriteriaOperator::And => {
            if criteria.conditions.is_empty() {
                return Ok(false);
            }
            for condition in &criteria.conditions {
                let Some(value) = data.get(&condition.field) else {
                    return Ok(false);
                };
                if !check_condition(condition, value)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        CriteriaOperator::Or => {
            let mut deferred: Option<EngineError> = None;
            for condition in &criteria.conditions {
                let Some(value) = data.get(&condition.field) else {
                    continue;
                };
                match check_condition(condition, value) {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    Err(err) => {
                        if deferred.is_none() {
                            deferred = Some(err);
                        }
                    }
                }
            }
            match deferred {
                Some(err) => Err(err),
                None => Ok(false),
            }
        }
    }
}

/// Reward gate: all include criteria hold and no exclude criterion fires.
///
/// The two sides run as sibling branches under a child of the caller's
/// cancellation token. An exclude hit or an error on either side cancels
/// the child so the peer abandons its remaining criteria; the decision is
/// the post-join combinator `include && !exclude`, independent of which
/// branch finished first.
pub async fn check_reward_criteria(
    reward: &RewardCriteria,
    data: &DataMap,
    cancel: &CancellationToken,
) -> EngineResult<bool> {
    if reward.include.is_empty() {
        return Err(EngineError::EmptyRule);
    }

    let gate_cancel = cancel.child_token();

    let exclude_branch = async {
        for criteria in &reward.exclude {
            if gate_cancel.is_cancelled() {
                return Ok::<bool, EngineError>(false);
            }
            match check_criteria(criteria, data) {
                Ok(true) => {
                    gate_cancel.cancel();
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) => {
                    gate_cancel.cancel();
                    return Err(err);
                }
            }
            yield_now().await;
        }
        Ok(false)
    };

    let include_branch = async {
        for criteria in &reward.include {
            if gate_cancel.is_cancelled() {
                return Ok::<bool, EngineError>(false);
            }
            match check_criteria(criteria, data) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(err) => {
                    gate_cancel.cancel();
                    return Err(err);
                }
            }
            yield_now().await;
        }
        Ok(true)
    };

    let (include, exclude) = tokio::join!(include_branch, exclude_branch);
    let include = include?;
    let exclude = exclude?;
    Ok(include && !exclude)
}
