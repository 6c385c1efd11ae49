// Points service
//
// Orchestrates the ledger store, the optional balance cache, and the rule
// engine transport. Runs without a cache (store-only) and without an
// engine client (query and activation paths only).

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::points::cache::BalanceCache;
use crate::points::engine_client::EngineClient;
use crate::points::error::{PointsError, PointsResult};
use crate::points::models::{NewAccrual, OrderMessage, PointTransaction};
use crate::points::repository::PointsStore;

pub struct PointsService {
    store: Arc<dyn PointsStore>,
    cache: Option<Arc<dyn BalanceCache>>,
    engine: Option<Arc<dyn EngineClient>>,
    days_until_accrual: i64,
}

impl PointsService {
    /// `days_until_accrual` is the activation delay given to every new
    /// order accrual.
    pub fn new(
        store: Arc<dyn PointsStore>,
        cache: Option<Arc<dyn BalanceCache>>,
        days_until_accrual: i64,
    ) -> Self {
        Self {
            store,
            cache,
            engine: None,
            days_until_accrual,
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn EngineClient>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Handle an order message: ask the engine for the award and record a
    /// pending accrual activating after the configured delay.
    pub async fn order_calculate(&self, order_json: &str) -> PointsResult<()> {
        let engine = self.engine.as_ref().ok_or_else(|| {
            PointsError::Config("engine client is not configured".to_string())
        })?;

        let message = OrderMessage::parse(order_json)?;
        let points = engine.calculate(order_json).await?;

        let account = self.store.get_user_uuid(&message.user_id).await?;
        let accrual = NewAccrual {
            point_account: account,
            points: f64::from(points),
            commit_date: Utc::now() + Duration::days(self.days_until_accrual),
            order_id: Some(message.order_id),
        };
        self.store.tnx_create(&accrual).await?;
        Ok(())
    }

    /// Handle a return message: drop every transaction recorded for the
    /// order. Safe to repeat.
    pub async fn return_process(&self, order_json: &str) -> PointsResult<()> {
        let message = OrderMessage::parse(order_json)?;
        tracing::info!(order = %message.order_id, "processing return");
        self.store.tnx_delete(&message.order_id).await
    }

    /// Commit every pending accrual that is due now, then drop the cached
    /// balances the commit touched.
    pub async fn commit_on_date(&self) -> PointsResult<()> {
        let users = self.store.tnx_commit_on_date(Utc::now()).await?;
        for user in &users {
            self.invalidate_balance(user).await;
        }
        Ok(())
    }

    pub async fn redeem(&self, user: &str, points: f64, redeem_id: &str) -> PointsResult<()> {
        self.store.redeem(user, points, redeem_id).await?;
        self.invalidate_balance(user).await;
        Ok(())
    }

    pub async fn transfer(
        &self,
        user_from: &str,
        user_to: &str,
        points: f64,
        transfer_id: &str,
    ) -> PointsResult<()> {
        self.store
            .transfer(user_from, user_to, points, transfer_id)
            .await?;
        self.invalidate_balance(user_from).await;
        self.invalidate_balance(user_to).await;
        Ok(())
    }

    /// Balance query with cache read-through; the cache never decides
    /// failure, only the store does.
    pub async fn get_balance(&self, user: &str) -> PointsResult<f64> {
        if let Some(cache) = &self.cache {
            match cache.get_balance(user).await {
                Ok(Some(points)) => return Ok(points),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "balance cache read failed"),
            }
            let points = self.store.get_balance(user).await?;
            if let Err(err) = cache.set_balance(user, points).await {
                tracing::warn!(error = %err, "balance cache write failed");
            }
            return Ok(points);
        }
        self.store.get_balance(user).await
    }

    pub async fn get_tnx(
        &self,
        user: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PointsResult<Vec<PointTransaction>> {
        self.store.get_tnx(user, from, to).await
    }

    async fn invalidate_balance(&self, user: &str) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.invalidate_balance(user).await {
                tracing::warn!(user = %user, error = %err, "balance cache invalidation failed");
            }
        }
    }
}
