// In-memory test doubles for the ledger seams

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::points::cache::BalanceCache;
use crate::points::engine_client::EngineClient;
use crate::points::error::{PointsError, PointsResult};
use crate::points::models::{NewAccrual, PointTransaction, TnxType};
use crate::points::repository::PointsStore;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, (Uuid, f64)>,
    transactions: Vec<PointTransaction>,
}

/// In-memory ledger with the same observable contract as the Postgres
/// store, minus real locking.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<LedgerState>,
    balance_reads: AtomicU64,
}

impl MemoryStore {
    pub fn seed_account(&self, user: &str, balance: f64) {
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(user.to_string(), (Uuid::new_v4(), balance));
    }

    pub fn balance(&self, user: &str) -> f64 {
        self.state.lock().unwrap().accounts[user].1
    }

    pub fn all_transactions(&self) -> Vec<PointTransaction> {
        self.state.lock().unwrap().transactions.clone()
    }

    pub fn balance_reads(&self) -> u64 {
        self.balance_reads.load(Ordering::Relaxed)
    }

    fn account_of(state: &mut LedgerState, user: &str) -> (Uuid, f64) {
        *state
            .accounts
            .entry(user.to_string())
            .or_insert_with(|| (Uuid::new_v4(), 0.0))
    }

    fn committed_row(
        account: Uuid,
        points: f64,
        type_tnx: TnxType,
        transfer_id: Option<&str>,
        redeem_id: Option<&str>,
    ) -> PointTransaction {
        PointTransaction {
            id: Uuid::new_v4(),
            point_account: account,
            points,
            commit_date: Utc::now(),
            commit: true,
            type_tnx,
            order_id: None,
            transfer_id: transfer_id.map(str::to_string),
            redeem_id: redeem_id.map(str::to_string),
        }
    }
}

#[async_trait]
impl PointsStore for MemoryStore {
    async fn tnx_create(&self, accrual: &NewAccrual) -> PointsResult<Uuid> {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().transactions.push(PointTransaction {
            id,
            point_account: accrual.point_account,
            points: accrual.points,
            commit_date: accrual.commit_date,
            commit: false,
            type_tnx: TnxType::Accrual,
            order_id: accrual.order_id.clone(),
            transfer_id: None,
            redeem_id: None,
        });
        Ok(id)
    }

    async fn tnx_delete(&self, order_id: &str) -> PointsResult<()> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .retain(|tnx| tnx.order_id.as_deref() != Some(order_id));
        Ok(())
    }

    async fn tnx_commit_on_date(&self, date: DateTime<Utc>) -> PointsResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();

        let mut due: HashMap<Uuid, f64> = HashMap::new();
        for tnx in &mut state.transactions {
            if !tnx.commit && tnx.commit_date <= date {
                *due.entry(tnx.point_account).or_default() += tnx.points;
                tnx.commit = true;
            }
        }

        let mut users = Vec::new();
        for (user, (account, balance)) in state.accounts.iter_mut() {
            if let Some(points) = due.get(account) {
                *balance += points;
                users.push(user.clone());
            }
        }
        Ok(users)
    }

    async fn redeem(&self, user: &str, points: f64, redeem_id: &str) -> PointsResult<()> {
        let mut state = self.state.lock().unwrap();
        let (account, balance) = *state
            .accounts
            .get(user)
            .ok_or(PointsError::UserNotFound)?;
        if balance < points {
            return Err(PointsError::InsufficientFunds);
        }
        state.accounts.get_mut(user).unwrap().1 = balance - points;
        state.transactions.push(Self::committed_row(
            account,
            points,
            TnxType::Redeem,
            None,
            Some(redeem_id),
        ));
        Ok(())
    }

    async fn transfer(
        &self,
        user_from: &str,
        user_to: &str,
        points: f64,
        transfer_id: &str,
    ) -> PointsResult<()> {
        let mut state = self.state.lock().unwrap();
        let (from_account, from_balance) = Self::account_of(&mut state, user_from);
        let (to_account, to_balance) = Self::account_of(&mut state, user_to);
        if from_balance < points {
            return Err(PointsError::InsufficientFunds);
        }
        state.accounts.get_mut(user_from).unwrap().1 = from_balance - points;
        state.accounts.get_mut(user_to).unwrap().1 = to_balance + points;
        state.transactions.push(Self::committed_row(
            from_account,
            points,
            TnxType::Redeem,
            Some(transfer_id),
            None,
        ));
        state.transactions.push(Self::committed_row(
            to_account,
            points,
            TnxType::Accrual,
            Some(transfer_id),
            None,
        ));
        Ok(())
    }

    async fn get_balance(&self, user: &str) -> PointsResult<f64> {
        self.balance_reads.fetch_add(1, Ordering::Relaxed);
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(user)
            .map(|(_, balance)| *balance)
            .ok_or(PointsError::UserNotFound)
    }

    async fn get_tnx(
        &self,
        user: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PointsResult<Vec<PointTransaction>> {
        let state = self.state.lock().unwrap();
        let (account, _) = *state.accounts.get(user).ok_or(PointsError::UserNotFound)?;
        Ok(state
            .transactions
            .iter()
            .filter(|tnx| {
                tnx.point_account == account
                    && tnx.commit
                    && tnx.commit_date >= from
                    && tnx.commit_date <= to
            })
            .cloned()
            .collect())
    }

    async fn get_user_uuid(&self, user: &str) -> PointsResult<Uuid> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::account_of(&mut state, user).0)
    }
}

/// In-memory balance cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, f64>>,
}

impl MemoryCache {
    pub fn set(&self, user: &str, points: f64) {
        self.entries.lock().unwrap().insert(user.to_string(), points);
    }

    pub fn get(&self, user: &str) -> Option<f64> {
        self.entries.lock().unwrap().get(user).copied()
    }
}

#[async_trait]
impl BalanceCache for MemoryCache {
    async fn get_balance(&self, user: &str) -> PointsResult<Option<f64>> {
        Ok(self.get(user))
    }

    async fn set_balance(&self, user: &str, points: f64) -> PointsResult<()> {
        self.set(user, points);
        Ok(())
    }

    async fn invalidate_balance(&self, user: &str) -> PointsResult<()> {
        self.entries.lock().unwrap().remove(user);
        Ok(())
    }
}

/// Engine transport that always awards a fixed number of points.
pub struct StubEngine {
    points: i32,
}

impl StubEngine {
    pub fn awarding(points: i32) -> Self {
        Self { points }
    }
}

#[async_trait]
impl EngineClient for StubEngine {
    async fn calculate(&self, _order_json: &str) -> PointsResult<i32> {
        Ok(self.points)
    }
}
