// HTTP facade for the rule engine

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::evaluator::DataMap;
use crate::engine::metrics::EngineMetrics;
use crate::engine::models::Rule;
use crate::engine::repository::RuleStore;
use crate::engine::service::RuleEngineService;

/// Shared state of the rules facade.
///
/// With a `snapshot` present the service was built once at startup;
/// otherwise each calculate call rebuilds the snapshot from the store,
/// which is how rule edits become visible without a restart.
#[derive(Clone)]
pub struct EngineState {
    pub store: Arc<dyn RuleStore>,
    pub snapshot: Option<Arc<RuleEngineService>>,
    pub metrics: Arc<EngineMetrics>,
}

pub fn router(state: EngineState) -> Router {
    Router::new()
        .route("/calculate", post(calculate))
        .route("/rules", get(get_active_rules))
        .route("/rule/:id", get(get_rule))
        .route("/rule", post(save_rule))
        .route("/all", get(get_all_rules))
        .with_state(state)
}

#[derive(Serialize)]
struct CalculateResponse {
    points: i32,
}

async fn calculate(
    State(state): State<EngineState>,
    Json(order): Json<DataMap>,
) -> EngineResult<Json<CalculateResponse>> {
    let cancel = CancellationToken::new();
    let points = match &state.snapshot {
        Some(service) => service.calculate(&order, &cancel).await,
        None => {
            let service = RuleEngineService::from_store(state.store.as_ref())
                .await?
                .with_metrics(state.metrics.clone());
            service.calculate(&order, &cancel).await
        }
    };
    Ok(Json(CalculateResponse { points }))
}

async fn get_active_rules(State(state): State<EngineState>) -> EngineResult<Json<Vec<Rule>>> {
    let rules = state.store.get_active_rules().await?;
    if rules.is_empty() {
        return Err(EngineError::NotFound);
    }
    Ok(Json(rules))
}

async fn get_all_rules(State(state): State<EngineState>) -> EngineResult<Json<Vec<Rule>>> {
    let rules = state.store.get_all_rules().await?;
    if rules.is_empty() {
        return Err(EngineError::NotFound);
    }
    Ok(Json(rules))
}

async fn get_rule(
    State(state): State<EngineState>,
    Path(id): Path<Uuid>,
) -> EngineResult<Json<Rule>> {
    let rule = state.store.get_rule(id).await?.ok_or(EngineError::NotFound)?;
    Ok(Json(rule))
}

async fn save_rule(
    State(state): State<EngineState>,
    Json(rule): Json<Rule>,
) -> EngineResult<(StatusCode, Json<serde_json::Value>)> {
    let id = state.store.save_rule(rule).await?;
    Ok((StatusCode::OK, Json(json!({ "id": id }))))
}
