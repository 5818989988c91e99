use crate::error::{AppError, AppResult};
use crate::models::plan::{FeatureId, PlanTier};
use crate::models::settings::UserSettings;
use crate::services::entitlements::EntitlementResolver;
use crate::services::settings_store::{SettingsChange, SettingsMutation, SettingsStore};

fn validate_user_id(user_id: &str) -> AppResult<()> {
    if user_id.trim().is_empty() {
        return Err(AppError::BadRequest("User id must not be empty".into()));
    }
    Ok(())
}

/// Stored settings for the user, or defaults (free tier) for a user the
/// store has never seen.
pub async fn load_settings(store: &dyn SettingsStore, user_id: &str) -> AppResult<UserSettings> {
    validate_user_id(user_id)?;
    Ok(store.get_settings(user_id).await?.unwrap_or_default())
}

/// Atomic update of the user's settings. Gating done inside `mutate` sees
/// the tier stored at the moment of the write.
pub async fn modify_settings(
    store: &dyn SettingsStore,
    user_id: &str,
    mutate: SettingsMutation<'_>,
) -> AppResult<SettingsChange> {
    validate_user_id(user_id)?;
    store.update_settings(user_id, mutate).await
}

pub fn require_feature(
    resolver: &EntitlementResolver,
    tier: PlanTier,
    feature: FeatureId,
) -> AppResult<()> {
    if resolver.has_access(tier, feature) {
        return Ok(());
    }
    tracing::debug!("Denied {} on {} plan", feature, tier);
    Err(AppError::UpgradeRequired {
        feature,
        upgrade: resolver.upgrade_info(feature),
    })
}

/// Turns off every toggle in `settings` whose feature `tier` no longer
/// grants. Returns the revoked features.
pub fn revoke_unentitled(
    resolver: &EntitlementResolver,
    tier: PlanTier,
    settings: &mut UserSettings,
) -> Vec<FeatureId> {
    let revoked: Vec<FeatureId> = settings
        .gated_features_in_use()
        .into_iter()
        .filter(|f| !resolver.has_access(tier, *f))
        .collect();
    for feature in &revoked {
        settings.revoke(*feature);
    }
    revoked
}
