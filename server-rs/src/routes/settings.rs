use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::entitlements::{load_settings, modify_settings, require_feature, revoke_unentitled};
use crate::models::plan::{FeatureId, PlanTier};
use crate::models::settings::{PlanChangeRequest, SettingsPatch, UserSettings};
use crate::AppState;

pub async fn get_settings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<UserSettings>> {
    let settings = load_settings(state.store.as_ref(), &user_id).await?;
    Ok(Json(settings))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> AppResult<Json<UserSettings>> {
    let resolver = &state.resolver;
    let change = modify_settings(state.store.as_ref(), &user_id, &|settings: &mut UserSettings| {
        let tier = settings.tier();
        for feature in patch.requested_features() {
            require_feature(resolver, tier, feature)?;
        }
        patch.apply(settings);
        Ok(())
    })
    .await?;

    Ok(Json(change.after))
}

pub async fn set_plan(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<PlanChangeRequest>,
) -> AppResult<Json<Value>> {
    let tier: PlanTier = body.tier.parse().map_err(AppError::BadRequest)?;

    let resolver = &state.resolver;
    let change = modify_settings(state.store.as_ref(), &user_id, &|settings: &mut UserSettings| {
        revoke_unentitled(resolver, tier, settings);
        settings.plan_tier = tier.to_string();
        Ok(())
    })
    .await?;

    let previous = change.before.tier();
    let still_on = change.after.gated_features_in_use();
    let revoked: Vec<FeatureId> = change
        .before
        .gated_features_in_use()
        .into_iter()
        .filter(|f| !still_on.contains(f))
        .collect();

    tracing::info!(
        "User {} moved from {} to {} plan ({} toggles revoked)",
        user_id,
        previous,
        tier,
        revoked.len()
    );

    Ok(Json(json!({
        "previousTier": previous,
        "tier": tier,
        "revoked": revoked,
        "settings": change.after,
    })))
}
