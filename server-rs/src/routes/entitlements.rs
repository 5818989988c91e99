use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::entitlements::load_settings;
use crate::models::plan::{AccessDecision, Restriction, UpgradeMessage};
use crate::services::usage_meters;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckParams {
    pub tier: Option<String>,
    pub feature: String,
}

pub async fn check(
    State(state): State<AppState>,
    Query(params): Query<CheckParams>,
) -> Json<AccessDecision> {
    let tier = params.tier.as_deref().unwrap_or("free");
    Json(state.resolver.check_raw(tier, &params.feature))
}

pub async fn upgrade_info(
    State(state): State<AppState>,
    Path(feature): Path<String>,
) -> Json<UpgradeMessage> {
    Json(state.resolver.upgrade_info_raw(&feature))
}

pub async fn user_entitlements(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Value>> {
    let settings = load_settings(state.store.as_ref(), &user_id).await?;
    let tier = settings.tier();
    let plan = state.resolver.plan(tier);
    let restrictions: Vec<Restriction> = Restriction::ALL
        .into_iter()
        .filter(|r| plan.map(|p| p.is_restricted(*r)).unwrap_or(true))
        .collect();
    let quota = usage_meters::get_status(
        state.store.as_ref(),
        &state.resolver,
        &user_id,
        tier,
        Utc::now(),
    )
    .await?;

    Ok(Json(json!({
        "userId": user_id,
        "tier": tier,
        "features": state.resolver.features_for(tier),
        "plan": plan,
        "restrictions": restrictions,
        "quota": quota,
    })))
}
