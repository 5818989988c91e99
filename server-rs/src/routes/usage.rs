use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;

use crate::error::AppResult;
use crate::middleware::entitlements::load_settings;
use crate::services::usage_meters::{self, QuotaStatus};
use crate::AppState;

pub async fn consume_query(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<QuotaStatus>> {
    let settings = load_settings(state.store.as_ref(), &user_id).await?;
    let status = usage_meters::consume(
        state.store.as_ref(),
        &state.resolver,
        &user_id,
        settings.tier(),
        Utc::now(),
    )
    .await?;
    Ok(Json(status))
}

pub async fn usage(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<QuotaStatus>> {
    let settings = load_settings(state.store.as_ref(), &user_id).await?;
    let status = usage_meters::get_status(
        state.store.as_ref(),
        &state.resolver,
        &user_id,
        settings.tier(),
        Utc::now(),
    )
    .await?;
    Ok(Json(status))
}
