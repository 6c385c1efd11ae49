// Error types for the rule engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::engine::models::ConditionOperator;

/// Failure of the scalar comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompareError {
    /// A date string on one side, a string that is not a date on the other.
    #[error("date parsing error")]
    DateParseMismatch,

    /// No coercion accepts the pair of operand kinds.
    #[error("compare is impossible")]
    Incomparable,
}

/// Errors produced by rule evaluation and the rules facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A gate with an empty include list is malformed by definition.
    #[error("rule is empty")]
    EmptyRule,

    /// Evaluation of the identified rule failed.
    #[error("incorrect rule: {rule_id}")]
    Rule {
        rule_id: Uuid,
        #[source]
        source: Box<EngineError>,
    },

    /// A condition could not be compared against the order document.
    #[error("criteria is wrong: {field}, {operator}")]
    Condition {
        field: String,
        operator: ConditionOperator,
        #[source]
        source: CompareError,
    },

    /// The order document is missing or mistypes a required key.
    #[error("invalid order document: {0}")]
    InvalidOrder(String),

    #[error("rule not found")]
    NotFound,

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("malformed rule payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            EngineError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            EngineError::Malformed(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            EngineError::Storage(err) => {
                tracing::error!(error = %err, "rule storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage error".to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
