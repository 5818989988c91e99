use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::plan::{FeatureId, UpgradeMessage};
use crate::services::catalog::CatalogError;
use crate::services::usage_meters::QuotaStatus;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Feature '{feature}' requires the {} plan", .upgrade.minimum_tier)]
    UpgradeRequired {
        feature: FeatureId,
        upgrade: UpgradeMessage,
    },

    #[error("Query quota exhausted")]
    QuotaExceeded {
        status: QuotaStatus,
        upgrade: Option<UpgradeMessage>,
    },

    #[error("Rate limited")]
    RateLimited,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::UpgradeRequired { feature, upgrade } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": self.to_string(),
                    "feature": feature,
                    "upgrade": upgrade,
                }),
            ),
            AppError::QuotaExceeded { status, upgrade } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "Query quota exhausted for this period",
                    "quota": status,
                    "upgrade": upgrade,
                }),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "Too many requests" }),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::Catalog(e) => {
                tracing::error!("Catalog error: {e}");
                internal()
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {e}");
                internal()
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {e}");
                internal()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                internal()
            }
        };

        (status, Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "Internal server error" }),
    )
}

pub type AppResult<T> = Result<T, AppError>;
