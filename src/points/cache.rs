// Balance cache
//
// Read-through cache over the ledger's balance queries. Entries expire
// after five minutes; every balance-changing operation deletes the key.
// Cache failures never fail the containing operation.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::points::error::PointsResult;

const BALANCE_TTL_SECS: u64 = 300;

/// Read-through, write-invalidate store of user balances.
#[async_trait]
pub trait BalanceCache: Send + Sync {
    /// `None` on a miss; misses are non-fatal by contract.
    async fn get_balance(&self, user: &str) -> PointsResult<Option<f64>>;
    async fn set_balance(&self, user: &str, points: f64) -> PointsResult<()>;
    async fn invalidate_balance(&self, user: &str) -> PointsResult<()>;
}

/// Redis-backed balance cache.
#[derive(Clone)]
pub struct RedisBalanceCache {
    conn: ConnectionManager,
}

impl RedisBalanceCache {
    pub async fn connect(config: &CacheConfig) -> PointsResult<Self> {
        let client = redis::Client::open(config.connection_url())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

/// Cache bootstrap shared by the server and the jobs: no configuration or
/// a failed connection degrades the process to store-only.
pub async fn connect_optional(config: Option<&CacheConfig>) -> Option<Arc<dyn BalanceCache>> {
    let config = config?;
    match RedisBalanceCache::connect(config).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(err) => {
            tracing::error!(error = %err, "balance cache unavailable, continuing without it");
            None
        }
    }
}

#[async_trait]
impl BalanceCache for RedisBalanceCache {
    async fn get_balance(&self, user: &str) -> PointsResult<Option<f64>> {
        let mut conn = self.conn.clone();
        let value: Option<f64> = conn.get(user).await?;
        Ok(value)
    }

    async fn set_balance(&self, user: &str, points: f64) -> PointsResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(user, points, BALANCE_TTL_SECS).await?;
        Ok(())
    }

    async fn invalidate_balance(&self, user: &str) -> PointsResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(user).await?;
        Ok(())
    }
}
