// Ledger storage
//
// All cross-process coordination on account balances goes through Postgres
// row locks (`SELECT ... FOR UPDATE`); no in-process locks are held on
// account data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::points::error::{PointsError, PointsResult};
use crate::points::models::{NewAccrual, PointTransaction, TnxType};

/// Transactional operations on accounts and the transaction log.
#[async_trait]
pub trait PointsStore: Send + Sync {
    /// Insert a pending accrual; returns the fresh transaction id.
    async fn tnx_create(&self, accrual: &NewAccrual) -> PointsResult<Uuid>;

    /// Remove every transaction recorded for the order id. Idempotent.
    async fn tnx_delete(&self, order_id: &str) -> PointsResult<()>;

    /// Commit all pending accruals due at `date` onto account balances.
    /// Returns the user ids whose balances changed.
    async fn tnx_commit_on_date(&self, date: DateTime<Utc>) -> PointsResult<Vec<String>>;

    async fn redeem(&self, user: &str, points: f64, redeem_id: &str) -> PointsResult<()>;

    async fn transfer(
        &self,
        user_from: &str,
        user_to: &str,
        points: f64,
        transfer_id: &str,
    ) -> PointsResult<()>;

    async fn get_balance(&self, user: &str) -> PointsResult<f64>;

    /// Committed transactions in the inclusive date window.
    async fn get_tnx(
        &self,
        user: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PointsResult<Vec<PointTransaction>>;

    /// Account uuid for the user; creates a zero-balance account if absent.
    async fn get_user_uuid(&self, user: &str) -> PointsResult<Uuid>;
}

/// Postgres-backed ledger store.
#[derive(Clone)]
pub struct PgPointsRepository {
    pool: PgPool,
    balance_workers: usize,
}

#[derive(sqlx::FromRow)]
struct AccrualGroup {
    point_account: Uuid,
    points: f64,
    user_id: String,
}

const SELECT_TNX: &str = "SELECT id, pointaccount AS point_account, points, \
     commitdate AS commit_date, commit, typetnx AS type_tnx, \
     orderid AS order_id, transferid AS transfer_id, redeemid AS redeem_id \
     FROM tnx";

impl PgPointsRepository {
    /// `balance_workers` caps the concurrent per-account transactions of
    /// the commit-on-date job; it is clamped to at least one.
    pub fn new(pool: PgPool, balance_workers: usize) -> Self {
        Self {
            pool,
            balance_workers: balance_workers.max(1),
        }
    }
}

/// Canonical lock order for a pair of account rows: smaller uuid first.
/// Symmetric concurrent transfers then always take the locks in the same
/// order and cannot deadlock.
fn lock_order(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

async fn lock_balance(
    tx: &mut Transaction<'_, Postgres>,
    account: Uuid,
) -> PointsResult<f64> {
    let (balance,): (f64,) =
        sqlx::query_as("SELECT balance FROM accounts WHERE uuid = $1 FOR UPDATE")
            .bind(account)
            .fetch_one(&mut **tx)
            .await?;
    Ok(balance)
}

async fn set_balance(
    tx: &mut Transaction<'_, Postgres>,
    account: Uuid,
    balance: f64,
) -> PointsResult<()> {
    sqlx::query("UPDATE accounts SET balance = $1 WHERE uuid = $2")
        .bind(balance)
        .bind(account)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Insert an already-committed ledger row (redeem or transfer leg).
async fn insert_committed(
    tx: &mut Transaction<'_, Postgres>,
    account: Uuid,
    points: f64,
    type_tnx: TnxType,
    transfer_id: Option<&str>,
    redeem_id: Option<&str>,
) -> PointsResult<()> {
    sqlx::query(
        "INSERT INTO tnx (id, pointaccount, points, commitdate, commit, typetnx, transferid, redeemid) \
         VALUES ($1, $2, $3, $4, true, $5, $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(account)
    .bind(points)
    .bind(Utc::now())
    .bind(type_tnx)
    .bind(transfer_id)
    .bind(redeem_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// One account group of the commit-on-date job: lock the balance row, add
/// the due points, flag the rows. The `commit = false` predicate on the
/// flag update keeps rows committed by a concurrent run from being applied
/// twice.
async fn commit_account_group(
    pool: &PgPool,
    account: Uuid,
    points: f64,
    date: DateTime<Utc>,
) -> PointsResult<()> {
    let mut tx = pool.begin().await?;

    let balance = lock_balance(&mut tx, account).await?;
    set_balance(&mut tx, account, balance + points).await?;

    sqlx::query(
        "UPDATE tnx SET commit = true \
         WHERE pointaccount = $1 AND commit = false AND commitdate <= $2",
    )
    .bind(account)
    .bind(date)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[async_trait]
impl PointsStore for PgPointsRepository {
    async fn tnx_create(&self, accrual: &NewAccrual) -> PointsResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tnx (id, pointaccount, points, commitdate, commit, typetnx, orderid) \
             VALUES ($1, $2, $3, $4, false, $5, $6)",
        )
        .bind(id)
        .bind(accrual.point_account)
        .bind(accrual.points)
        .bind(accrual.commit_date)
        .bind(TnxType::Accrual)
        .bind(accrual.order_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn tnx_delete(&self, order_id: &str) -> PointsResult<()> {
        sqlx::query("DELETE FROM tnx WHERE orderid = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tnx_commit_on_date(&self, date: DateTime<Utc>) -> PointsResult<Vec<String>> {
        let groups: Vec<AccrualGroup> = sqlx::query_as(
            "SELECT t.pointaccount AS point_account, SUM(t.points) AS points, \
                    a.userid AS user_id \
             FROM tnx t JOIN accounts a ON a.uuid = t.pointaccount \
             WHERE t.commit = false AND t.commitdate <= $1 \
             GROUP BY t.pointaccount, a.userid",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        let permits = Arc::new(Semaphore::new(self.balance_workers));
        let mut tasks = JoinSet::new();
        for group in groups {
            let pool = self.pool.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                match commit_account_group(&pool, group.point_account, group.points, date).await {
                    Ok(()) => Some(group.user_id),
                    Err(err) => {
                        tracing::error!(
                            account = %group.point_account,
                            error = %err,
                            "commit on date failed for account"
                        );
                        None
                    }
                }
            });
        }

        let mut users = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(user)) = joined {
                users.push(user);
            }
        }
        Ok(users)
    }

    async fn redeem(&self, user: &str, points: f64, redeem_id: &str) -> PointsResult<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, f64)> =
            sqlx::query_as("SELECT uuid, balance FROM accounts WHERE userid = $1 FOR UPDATE")
                .bind(user)
                .fetch_optional(&mut *tx)
                .await?;
        let (account, balance) = row.ok_or(PointsError::UserNotFound)?;
        if balance < points {
            return Err(PointsError::InsufficientFunds);
        }

        set_balance(&mut tx, account, balance - points).await?;
        insert_committed(&mut tx, account, points, TnxType::Redeem, None, Some(redeem_id)).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn transfer(
        &self,
        user_from: &str,
        user_to: &str,
        points: f64,
        transfer_id: &str,
    ) -> PointsResult<()> {
        let from_account = self.get_user_uuid(user_from).await?;
        let to_account = self.get_user_uuid(user_to).await?;
        if from_account == to_account {
            return Err(PointsError::MalformedMessage(
                "transfer requires two distinct accounts".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let (first, second) = lock_order(from_account, to_account);
        let first_balance = lock_balance(&mut tx, first).await?;
        let second_balance = lock_balance(&mut tx, second).await?;
        let (from_balance, to_balance) = if first == from_account {
            (first_balance, second_balance)
        } else {
            (second_balance, first_balance)
        };

        if from_balance < points {
            return Err(PointsError::InsufficientFunds);
        }

        set_balance(&mut tx, from_account, from_balance - points).await?;
        insert_committed(
            &mut tx,
            from_account,
            points,
            TnxType::Redeem,
            Some(transfer_id),
            None,
        )
        .await?;

        set_balance(&mut tx, to_account, to_balance + points).await?;
        insert_committed(
            &mut tx,
            to_account,
            points,
            TnxType::Accrual,
            Some(transfer_id),
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_balance(&self, user: &str) -> PointsResult<f64> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT balance FROM accounts WHERE userid = $1")
                .bind(user)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(balance,)| balance).ok_or(PointsError::UserNotFound)
    }

    async fn get_tnx(
        &self,
        user: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PointsResult<Vec<PointTransaction>> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT uuid FROM accounts WHERE userid = $1")
            .bind(user)
            .fetch_optional(&self.pool)
            .await?;
        let (account,) = row.ok_or(PointsError::UserNotFound)?;

        let tnxs = sqlx::query_as::<_, PointTransaction>(&format!(
            "{} WHERE pointaccount = $1 AND commit = true \
             AND commitdate >= $2 AND commitdate <= $3 \
             ORDER BY commitdate",
            SELECT_TNX
        ))
        .bind(account)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(tnxs)
    }

    async fn get_user_uuid(&self, user: &str) -> PointsResult<Uuid> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT uuid FROM accounts WHERE userid = $1")
            .bind(user)
            .fetch_optional(&self.pool)
            .await?;
        if let Some((account,)) = row {
            return Ok(account);
        }

        // Race-safe create: a concurrent insert for the same user wins the
        // unique constraint and the re-select picks it up.
        sqlx::query(
            "INSERT INTO accounts (uuid, userid, balance) VALUES ($1, $2, 0) \
             ON CONFLICT (userid) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(user)
        .execute(&self.pool)
        .await?;

        let (account,): (Uuid,) = sqlx::query_as("SELECT uuid FROM accounts WHERE userid = $1")
            .bind(user)
            .fetch_one(&self.pool)
            .await?;
        Ok(account)
    }
}
