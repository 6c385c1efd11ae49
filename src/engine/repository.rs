// Rule storage
//
// Rules live in Postgres with the criteria trees as JSONB documents. The
// store trait keeps the evaluator and the handlers independent of the
// backing storage.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::engine::error::EngineResult;
use crate::engine::models::{RewardCriteria, Rule};

/// Abstract storage of reward rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_active_rules(&self) -> EngineResult<Vec<Rule>>;
    async fn get_all_rules(&self) -> EngineResult<Vec<Rule>>;
    async fn get_rule(&self, id: Uuid) -> EngineResult<Option<Rule>>;
    /// Create (nil id) or update (existing id) a rule; returns the id.
    async fn save_rule(&self, rule: Rule) -> EngineResult<Uuid>;
}

/// Postgres-backed rule store.
#[derive(Clone)]
pub struct PgRuleRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    active: bool,
    maximum: bool,
    header: serde_json::Value,
    items: serde_json::Value,
}

impl RuleRow {
    fn into_rule(self) -> EngineResult<Rule> {
        Ok(Rule {
            id: self.id,
            name: self.name,
            active: self.active,
            maximum: self.maximum,
            header: serde_json::from_value::<RewardCriteria>(self.header)?,
            items: serde_json::from_value::<Vec<RewardCriteria>>(self.items)?,
        })
    }
}

const SELECT_RULES: &str = "SELECT id, name, active, maximum, header, items FROM rules";

impl PgRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleStore for PgRuleRepository {
    async fn get_active_rules(&self) -> EngineResult<Vec<Rule>> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!("{} WHERE active = true", SELECT_RULES))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    async fn get_all_rules(&self) -> EngineResult<Vec<Rule>> {
        let rows = sqlx::query_as::<_, RuleRow>(SELECT_RULES)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    async fn get_rule(&self, id: Uuid) -> EngineResult<Option<Rule>> {
        let row = sqlx::query_as::<_, RuleRow>(&format!("{} WHERE id = $1", SELECT_RULES))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RuleRow::into_rule).transpose()
    }

    async fn save_rule(&self, rule: Rule) -> EngineResult<Uuid> {
        let id = if rule.id.is_nil() {
            Uuid::new_v4()
        } else {
            rule.id
        };

        sqlx::query(
            r#"
            INSERT INTO rules (id, name, active, maximum, header, items)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                active = EXCLUDED.active,
                maximum = EXCLUDED.maximum,
                header = EXCLUDED.header,
                items = EXCLUDED.items
            "#,
        )
        .bind(id)
        .bind(&rule.name)
        .bind(rule.active)
        .bind(rule.maximum)
        .bind(serde_json::to_value(&rule.header)?)
        .bind(serde_json::to_value(&rule.items)?)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory rule store for handler and service tests.
    #[derive(Default)]
    pub struct MemoryRuleStore {
        rules: Mutex<Vec<Rule>>,
    }

    impl MemoryRuleStore {
        pub fn with_rules(rules: Vec<Rule>) -> Self {
            Self {
                rules: Mutex::new(rules),
            }
        }
    }

    #[async_trait]
    impl RuleStore for MemoryRuleStore {
        async fn get_active_rules(&self) -> EngineResult<Vec<Rule>> {
            Ok(self
                .rules
                .lock()
                .unwrap()
                .iter()
                .filter(|rule| rule.active)
                .cloned()
                .collect())
        }

        async fn get_all_rules(&self) -> EngineResult<Vec<Rule>> {
            Ok(self.rules.lock().unwrap().clone())
        }

        async fn get_rule(&self, id: Uuid) -> EngineResult<Option<Rule>> {
            Ok(self
                .rules
                .lock()
                .unwrap()
                .iter()
                .find(|rule| rule.id == id)
                .cloned())
        }

        async fn save_rule(&self, mut rule: Rule) -> EngineResult<Uuid> {
            let mut rules = self.rules.lock().unwrap();
            if rule.id.is_nil() {
                rule.id = Uuid::new_v4();
            }
            let id = rule.id;
            match rules.iter_mut().find(|existing| existing.id == id) {
                Some(existing) => *existing = rule,
                None => rules.push(rule),
            }
            Ok(id)
        }
    }
}
