// Rule evaluation and the calculation orchestrator
//
// The service owns an immutable snapshot of active rules. Every calculate
// call fans the rules out concurrently, sums the awards of ordinary rules,
// takes the best award among maximum rules, and returns the larger of the
// two pools.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::evaluator::{check_reward_criteria, DataMap};
use crate::engine::metrics::EngineMetrics;
use crate::engine::models::{RewardCriteria, Rule};
use crate::engine::repository::RuleStore;

pub struct RuleEngineService {
    rules: Vec<Rule>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl RuleEngineService {
    /// Build a service over an explicit rule snapshot.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            metrics: None,
        }
    }

    /// Build a service over the currently-active rules in the store. The
    /// snapshot never refreshes for the life of this instance.
    pub async fn from_store(store: &dyn RuleStore) -> EngineResult<Self> {
        let rules = store.get_active_rules().await?;
        Ok(Self::new(rules))
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Evaluate every rule against the order and combine the awards.
    ///
    /// Ordinary rules contribute to a sum, maximum rules compete for the
    /// best single award; the result is the larger of the two pools.
    /// Per-rule failures are logged and count as zero points. Cancellation
    /// of the caller's token yields zero points without error.
    pub async fn calculate(&self, order: &DataMap, cancel: &CancellationToken) -> i32 {
        if let Some(metrics) = &self.metrics {
            metrics.record_calculation();
        }

        let awards = join_all(self.rules.iter().map(|rule| async move {
            if cancel.is_cancelled() {
                return None;
            }
            match relevant(rule, order, cancel).await {
                Ok(points) => Some((rule.maximum, points)),
                Err(err) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rule_error();
                    }
                    tracing::error!(rule = %rule.id, error = %err, "rule evaluation failed");
                    None
                }
            }
        }))
        .await;

        let mut sum: i32 = 0;
        let mut best_max: i32 = 0;
        for (maximum, points) in awards.into_iter().flatten() {
            if maximum {
                best_max = best_max.max(points);
            } else {
                sum = sum.saturating_add(points);
            }
        }
        sum.max(best_max)
    }
}

/// Evaluate a single rule against the order document.
///
/// The header gate runs first against the whole order; if it holds, the
/// header award applies and each order item is matched against each item
/// reward concurrently. An error in any part fails the whole rule, and the
/// sibling item tasks abandon their remaining work.
pub async fn relevant(
    rule: &Rule,
    order: &DataMap,
    cancel: &CancellationToken,
) -> EngineResult<i32> {
    let rule_error = |source: EngineError| EngineError::Rule {
        rule_id: rule.id,
        source: Box::new(source),
    };

    let gated = check_reward_criteria(&rule.header, order, cancel)
        .await
        .map_err(rule_error)?;
    if !gated {
        return Ok(0);
    }

    let header_points =
        reward_points(&rule.header, order.get("total"), "total").map_err(rule_error)?;

    let items = match order.get("items").and_then(Value::as_array) {
        Some(items) => items.as_slice(),
        None => &[],
    };
    if items.is_empty() || rule.items.is_empty() {
        return Ok(header_points);
    }

    let item_cancel = cancel.child_token();
    let tasks = items.iter().flat_map(|item| {
        let item_cancel = item_cancel.clone();
        rule.items.iter().map(move |reward| {
            let token = item_cancel.clone();
            async move {
                if token.is_cancelled() {
                    return Ok::<i32, EngineError>(0);
                }
                let item_data = match item.as_object() {
                    Some(data) => data,
                    None => {
                        token.cancel();
                        return Err(EngineError::InvalidOrder(
                            "order item is not a mapping".to_string(),
                        ));
                    }
                };
                let gated = match check_reward_criteria(reward, item_data, &token).await {
                    Ok(gated) => gated,
                    Err(err) => {
                        token.cancel();
                        return Err(err);
                    }
                };
                if !gated {
                    return Ok(0);
                }
                match reward_points(reward, item_data.get("price"), "price") {
                    Ok(points) => Ok(points),
                    Err(err) => {
                        token.cancel();
                        Err(err)
                    }
                }
            }
        })
    });

    let mut total = header_points;
    for result in join_all(tasks).await {
        total = total.saturating_add(result.map_err(rule_error)?);
    }
    Ok(total)
}

/// Points for one reward: ceiling of `reference * percent / 100` when
/// percent is set, the fixed amount otherwise.
fn reward_points(
    reward: &RewardCriteria,
    reference: Option<&Value>,
    field: &str,
) -> EngineResult<i32> {
    if reward.percent == 0 {
        return Ok(reward.points);
    }
    let value = reference.and_then(Value::as_f64).ok_or_else(|| {
        EngineError::InvalidOrder(format!("percent reward needs numeric {}", field))
    })?;
    Ok((value * f64::from(reward.percent) / 100.0).ceil() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::{Condition, ConditionOperator, Criteria, CriteriaOperator};
    use serde_json::json;
    use uuid::Uuid;

    fn order(value: serde_json::Value) -> DataMap {
        value.as_object().unwrap().clone()
    }

    fn cond(field: &str, operator: ConditionOperator, value: serde_json::Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    fn and(conditions: Vec<Condition>) -> Criteria {
        Criteria {
            operator: CriteriaOperator::And,
            conditions,
        }
    }

    fn or(conditions: Vec<Condition>) -> Criteria {
        Criteria {
            operator: CriteriaOperator::Or,
            conditions,
        }
    }

    fn rule(name: &str, maximum: bool, header: RewardCriteria, items: Vec<RewardCriteria>) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            name: name.to_string(),
            active: true,
            maximum,
            header,
            items,
        }
    }

    fn total_gate() -> Vec<Criteria> {
        vec![and(vec![cond("total", ConditionOperator::Ge, json!(1))])]
    }

    /// The seed rule set: fixed item bonus, max item percent, header
    /// percent, date-window promo, jackpot promo.
    fn seed_rules() -> Vec<Rule> {
        let r1 = rule(
            "item bonus",
            false,
            RewardCriteria {
                include: total_gate(),
                ..Default::default()
            },
            vec![RewardCriteria {
                points: 10,
                include: vec![and(vec![cond("price", ConditionOperator::Ge, json!(1))])],
                exclude: vec![or(vec![
                    cond("price", ConditionOperator::Lt, json!(100)),
                    cond("productid", ConditionOperator::Eq, json!("BadProduct")),
                ])],
                ..Default::default()
            }],
        );
        let r2 = rule(
            "max product",
            true,
            RewardCriteria {
                include: total_gate(),
                ..Default::default()
            },
            vec![RewardCriteria {
                percent: 50,
                include: vec![and(vec![cond(
                    "productid",
                    ConditionOperator::Eq,
                    json!("MaxProduct"),
                )])],
                ..Default::default()
            }],
        );
        let r3 = rule(
            "base percent",
            false,
            RewardCriteria {
                percent: 10,
                include: total_gate(),
                ..Default::default()
            },
            vec![],
        );
        let r4 = rule(
            "january promo",
            true,
            RewardCriteria {
                percent: 200,
                include: vec![and(vec![
                    cond("total", ConditionOperator::Ge, json!(1)),
                    cond("orderdate", ConditionOperator::Ge, json!("2025-01-01")),
                    cond("orderdate", ConditionOperator::Le, json!("2025-01-08")),
                ])],
                ..Default::default()
            },
            vec![],
        );
        let r5 = rule(
            "jackpot",
            true,
            RewardCriteria {
                percent: 300,
                include: vec![and(vec![
                    cond("total", ConditionOperator::Ge, json!(1)),
                    cond("jackpot", ConditionOperator::Eq, json!(true)),
                ])],
                ..Default::default()
            },
            vec![],
        );
        vec![r1, r2, r3, r4, r5]
    }

    async fn calculate(rules: Vec<Rule>, order_doc: DataMap) -> i32 {
        RuleEngineService::new(rules)
            .calculate(&order_doc, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_jackpot_order_takes_best_maximum() {
        let points = calculate(
            seed_rules(),
            order(json!({
                "total": 5000, "jackpot": true, "orderdate": "2025-01-02",
                "items": [{"price": 5000, "productid": "MaxProduct"}]
            })),
        )
        .await;
        // jackpot 300% of 5000 beats the promo, the item percent, and the sum pool
        assert_eq!(points, 15000);
    }

    #[tokio::test]
    async fn test_promo_window_doubles_large_order() {
        let points = calculate(
            seed_rules(),
            order(json!({
                "total": 51000, "orderdate": "2025-01-02",
                "items": [{"price": 5000, "productid": "MaxProduc2"}]
            })),
        )
        .await;
        assert_eq!(points, 102000);
    }

    #[tokio::test]
    async fn test_sum_pool_wins_outside_promo_window() {
        let points = calculate(
            seed_rules(),
            order(json!({
                "total": 500, "orderdate": "2025-12-02",
                "items": [{"price": 500, "productid": "MaxProduc2"}]
            })),
        )
        .await;
        // item bonus 10 + header percent 50
        assert_eq!(points, 60);
    }

    #[tokio::test]
    async fn test_max_item_percent_beats_sum_pool() {
        let points = calculate(
            seed_rules(),
            order(json!({
                "total": 500, "orderdate": "2025-12-02",
                "items": [{"price": 500, "productid": "MaxProduct"}]
            })),
        )
        .await;
        // 50% of 500 in the max pool against 60 in the sum pool
        assert_eq!(points, 250);
    }

    #[tokio::test]
    async fn test_excluded_product_keeps_header_percent_only() {
        let points = calculate(
            seed_rules(),
            order(json!({
                "total": 500, "orderdate": "2025-12-02",
                "items": [{"price": 500, "productid": "BadProduct"}]
            })),
        )
        .await;
        assert_eq!(points, 50);
    }

    #[tokio::test]
    async fn test_adding_a_maximum_rule_never_decreases_the_result() {
        let order_doc = order(json!({
            "total": 500, "orderdate": "2025-12-02",
            "items": [{"price": 500, "productid": "MaxProduc2"}]
        }));

        let without = calculate(seed_rules(), order_doc.clone()).await;

        let mut rules = seed_rules();
        rules.push(rule(
            "small max",
            true,
            RewardCriteria {
                points: 1,
                include: total_gate(),
                ..Default::default()
            },
            vec![],
        ));
        let with = calculate(rules, order_doc).await;

        assert!(with >= without);
        assert_eq!(with, without);
    }

    #[tokio::test]
    async fn test_percent_two_hundred_doubles_reference() {
        let rules = vec![rule(
            "double",
            false,
            RewardCriteria {
                percent: 200,
                include: total_gate(),
                ..Default::default()
            },
            vec![],
        )];
        let points = calculate(rules, order(json!({"total": 500}))).await;
        assert_eq!(points, 1000);
    }

    #[tokio::test]
    async fn test_percent_award_uses_ceiling() {
        let rules = vec![rule(
            "ten percent",
            false,
            RewardCriteria {
                percent: 10,
                include: total_gate(),
                ..Default::default()
            },
            vec![],
        )];
        // 10% of 55 = 5.5, rounded up
        let points = calculate(rules, order(json!({"total": 55}))).await;
        assert_eq!(points, 6);
    }

    #[tokio::test]
    async fn test_missing_total_with_percent_header_contributes_zero() {
        let failing = rule(
            "needs total",
            false,
            RewardCriteria {
                percent: 10,
                include: vec![and(vec![cond("jackpot", ConditionOperator::Eq, json!(true))])],
                ..Default::default()
            },
            vec![],
        );
        let fixed = rule(
            "fixed",
            false,
            RewardCriteria {
                points: 7,
                include: vec![and(vec![cond("jackpot", ConditionOperator::Eq, json!(true))])],
                ..Default::default()
            },
            vec![],
        );

        let points = calculate(vec![failing, fixed], order(json!({"jackpot": true}))).await;
        assert_eq!(points, 7);
    }

    #[tokio::test]
    async fn test_empty_include_rule_contributes_zero() {
        let broken = rule("broken", false, RewardCriteria::default(), vec![]);
        let ok = rule(
            "ok",
            false,
            RewardCriteria {
                points: 3,
                include: total_gate(),
                ..Default::default()
            },
            vec![],
        );
        let points = calculate(vec![broken, ok], order(json!({"total": 10}))).await;
        assert_eq!(points, 3);
    }

    #[tokio::test]
    async fn test_item_award_uses_item_reward_percent() {
        let rules = vec![rule(
            "item percent",
            false,
            RewardCriteria {
                include: total_gate(),
                ..Default::default()
            },
            vec![RewardCriteria {
                percent: 20,
                include: vec![and(vec![cond("price", ConditionOperator::Ge, json!(1))])],
                ..Default::default()
            }],
        )];
        let points = calculate(
            rules,
            order(json!({"total": 100, "items": [{"price": 250}]})),
        )
        .await;
        assert_eq!(points, 50);
    }

    #[tokio::test]
    async fn test_multiple_items_sum_commutatively() {
        let rules = vec![rule(
            "per item",
            false,
            RewardCriteria {
                include: total_gate(),
                ..Default::default()
            },
            vec![RewardCriteria {
                points: 10,
                include: vec![and(vec![cond("price", ConditionOperator::Ge, json!(1))])],
                ..Default::default()
            }],
        )];
        let points = calculate(
            rules,
            order(json!({
                "total": 300,
                "items": [{"price": 100}, {"price": 100}, {"price": 100}]
            })),
        )
        .await;
        assert_eq!(points, 30);
    }

    #[tokio::test]
    async fn test_cancelled_caller_yields_zero() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let points = RuleEngineService::new(seed_rules())
            .calculate(&order(json!({"total": 5000})), &cancel)
            .await;
        assert_eq!(points, 0);
    }

    #[tokio::test]
    async fn test_rule_errors_are_counted() {
        let metrics = Arc::new(EngineMetrics::new());
        let broken = rule("broken", false, RewardCriteria::default(), vec![]);
        let service = RuleEngineService::new(vec![broken]).with_metrics(metrics.clone());
        service
            .calculate(&order(json!({"total": 10})), &CancellationToken::new())
            .await;
        assert_eq!(metrics.calculations(), 1);
        assert_eq!(metrics.rule_errors(), 1);
    }
}
