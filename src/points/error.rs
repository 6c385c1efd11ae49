// Error types for the points ledger

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PointsError {
    /// Redeem or transfer against a balance that cannot cover it.
    #[error("not enough points")]
    InsufficientFunds,

    #[error("user not found")]
    UserNotFound,

    /// No committed transactions in the requested window.
    #[error("transactions not found")]
    NotFound,

    /// A broker message or request body fails to parse or is missing
    /// required fields.
    #[error("invalid message: {0}")]
    MalformedMessage(String),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("engine request failed: {0}")]
    Engine(#[from] reqwest::Error),

    #[error("engine service returned status {0}")]
    EngineStatus(u16),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type PointsResult<T> = Result<T, PointsError>;

impl From<rdkafka::error::KafkaError> for PointsError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        PointsError::Broker(err.to_string())
    }
}

impl From<lapin::Error> for PointsError {
    fn from(err: lapin::Error) -> Self {
        PointsError::Broker(err.to_string())
    }
}

impl IntoResponse for PointsError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PointsError::UserNotFound | PointsError::NotFound => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            PointsError::MalformedMessage(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            PointsError::InsufficientFunds => (StatusCode::CONFLICT, self.to_string()),
            PointsError::Storage(err) => {
                tracing::error!(error = %err, "ledger storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage error".to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
