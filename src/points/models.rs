// Ledger domain types and broker message formats

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::points::error::{PointsError, PointsResult};

/// Transaction kind as persisted in `tnx.typetnx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(i32)]
pub enum TnxType {
    Accrual = 0,
    Redeem = 1,
}

/// A point account: one row per external user id.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PointAccount {
    pub uuid: Uuid,
    pub user_id: String,
    pub balance: f64,
}

/// A row of the transaction log.
///
/// Accruals are born pending (`commit = false`) with a commit date in the
/// future; redeem and transfer rows are born already committed. Once
/// committed a row only ever changes by deletion through return handling.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PointTransaction {
    pub id: Uuid,
    pub point_account: Uuid,
    pub points: f64,
    pub commit_date: DateTime<Utc>,
    pub commit: bool,
    pub type_tnx: TnxType,
    pub order_id: Option<String>,
    pub transfer_id: Option<String>,
    pub redeem_id: Option<String>,
}

/// A pending accrual to be inserted for an order.
#[derive(Debug, Clone)]
pub struct NewAccrual {
    pub point_account: Uuid,
    pub points: f64,
    pub commit_date: DateTime<Utc>,
    pub order_id: Option<String>,
}

/// Envelope of order and return messages; the evaluator receives the full
/// message, the ledger path only needs the two ids.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderMessage {
    #[serde(rename = "orderId", default)]
    pub order_id: String,
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

impl OrderMessage {
    pub fn parse(order_json: &str) -> PointsResult<Self> {
        let message: OrderMessage = serde_json::from_str(order_json)
            .map_err(|err| PointsError::MalformedMessage(err.to_string()))?;
        if message.user_id.is_empty() {
            return Err(PointsError::MalformedMessage(
                "userId field is required".to_string(),
            ));
        }
        if message.order_id.is_empty() {
            return Err(PointsError::MalformedMessage(
                "orderId field is required".to_string(),
            ));
        }
        Ok(message)
    }
}

/// Redemption request from the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct RedeemMessage {
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(default)]
    pub points: f64,
    #[serde(rename = "redeemId", default)]
    pub redeem_id: String,
}

impl RedeemMessage {
    pub fn parse(redeem_json: &str) -> PointsResult<Self> {
        let message: RedeemMessage = serde_json::from_str(redeem_json)
            .map_err(|err| PointsError::MalformedMessage(err.to_string()))?;
        if message.user_id.is_empty() {
            return Err(PointsError::MalformedMessage(
                "userId field is required".to_string(),
            ));
        }
        if message.redeem_id.is_empty() {
            return Err(PointsError::MalformedMessage(
                "redeemId field is required".to_string(),
            ));
        }
        if !message.points.is_finite() || message.points <= 0.0 {
            return Err(PointsError::MalformedMessage(
                "points must be a positive number".to_string(),
            ));
        }
        Ok(message)
    }
}

/// Outcome published to the confirmation queue for every redeem attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemConfirmation {
    #[serde(rename = "RedeemId")]
    pub redeem_id: String,
    #[serde(rename = "Success")]
    pub success: bool,
}
