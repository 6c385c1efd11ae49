// HTTP facade for points queries and transfers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::points::error::{PointsError, PointsResult};
use crate::points::models::PointTransaction;
use crate::points::service::PointsService;

#[derive(Clone)]
pub struct PointsState {
    pub service: Arc<PointsService>,
}

pub fn router(state: PointsState) -> Router {
    Router::new()
        .route("/balance/:user", get(get_balance))
        .route("/tnx/:user", get(get_tnx))
        .route("/transfer", post(transfer))
        .with_state(state)
}

#[derive(Serialize)]
struct BalanceResponse {
    points: f64,
}

/// One committed transaction in a history response.
#[derive(Debug, Serialize)]
pub struct TnxMessage {
    pub uuid: Uuid,
    pub points: f64,
    #[serde(rename = "commitDate")]
    pub commit_date: DateTime<Utc>,
    pub commit: bool,
    #[serde(rename = "typeTnx")]
    pub type_tnx: i32,
    pub order: Option<String>,
    pub transfer: Option<String>,
    pub redeem: Option<String>,
}

impl From<PointTransaction> for TnxMessage {
    fn from(tnx: PointTransaction) -> Self {
        Self {
            uuid: tnx.id,
            points: tnx.points,
            commit_date: tnx.commit_date,
            commit: tnx.commit,
            type_tnx: tnx.type_tnx as i32,
            order: tnx.order_id,
            transfer: tnx.transfer_id,
            redeem: tnx.redeem_id,
        }
    }
}

async fn get_balance(
    State(state): State<PointsState>,
    Path(user): Path<String>,
) -> PointsResult<Json<BalanceResponse>> {
    let points = state.service.get_balance(&user).await?;
    Ok(Json(BalanceResponse { points }))
}

#[derive(Deserialize)]
struct TnxWindow {
    from: NaiveDate,
    to: NaiveDate,
}

async fn get_tnx(
    State(state): State<PointsState>,
    Path(user): Path<String>,
    Query(window): Query<TnxWindow>,
) -> PointsResult<Json<Vec<TnxMessage>>> {
    let from = window.from.and_time(NaiveTime::MIN).and_utc();
    let to = window
        .to
        .and_hms_opt(23, 59, 59)
        .unwrap_or_else(|| window.to.and_time(NaiveTime::MIN))
        .and_utc();

    let tnxs = state.service.get_tnx(&user, from, to).await?;
    if tnxs.is_empty() {
        return Err(PointsError::NotFound);
    }
    Ok(Json(tnxs.into_iter().map(TnxMessage::from).collect()))
}

#[derive(Debug, Deserialize, Validate)]
struct TransferRequest {
    #[validate(length(min = 1))]
    #[serde(rename = "userFrom")]
    user_from: String,
    #[validate(length(min = 1))]
    #[serde(rename = "userTo")]
    user_to: String,
    #[validate(range(exclusive_min = 0.0))]
    points: f64,
    #[validate(length(min = 1))]
    #[serde(rename = "transferId")]
    transfer_id: String,
}

async fn transfer(
    State(state): State<PointsState>,
    Json(request): Json<TransferRequest>,
) -> PointsResult<StatusCode> {
    request
        .validate()
        .map_err(|err| PointsError::MalformedMessage(err.to_string()))?;
    state
        .service
        .transfer(
            &request.user_from,
            &request.user_to,
            request.points,
            &request.transfer_id,
        )
        .await?;
    Ok(StatusCode::OK)
}
