use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::plan::{FeatureId, PlanTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

/// Persisted per-user settings. Field names match what the clients send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// Kept as the raw stored string; resolution to a tier happens on read.
    pub plan_tier: String,
    pub display_name: Option<String>,
    pub language: String,
    pub theme: Theme,
    pub notifications_enabled: bool,
    pub ninja_mode: bool,
    pub location_mode: bool,
    pub personality: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            plan_tier: PlanTier::Free.to_string(),
            display_name: None,
            language: "en".to_string(),
            theme: Theme::System,
            notifications_enabled: true,
            ninja_mode: false,
            location_mode: false,
            personality: None,
            updated_at: Utc::now(),
        }
    }
}

impl UserSettings {
    pub fn tier(&self) -> PlanTier {
        PlanTier::parse_or_free(&self.plan_tier)
    }

    /// Features the currently enabled toggles depend on.
    pub fn gated_features_in_use(&self) -> Vec<FeatureId> {
        let mut used = Vec::new();
        if self.ninja_mode {
            used.push(FeatureId::NinjaMode);
        }
        if self.location_mode {
            used.push(FeatureId::LocationMode);
        }
        if self.personality.is_some() {
            used.push(FeatureId::CustomPersonality);
        }
        used
    }

    /// Switches off a toggle whose feature is no longer granted.
    pub fn revoke(&mut self, feature: FeatureId) {
        match feature {
            FeatureId::NinjaMode => self.ninja_mode = false,
            FeatureId::LocationMode => self.location_mode = false,
            FeatureId::CustomPersonality => self.personality = None,
            _ => {}
        }
    }
}

/// Partial update. Absent fields are left untouched; `personality: null`
/// is indistinguishable from absent, so clearing uses an empty string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub display_name: Option<String>,
    pub language: Option<String>,
    pub theme: Option<Theme>,
    pub notifications_enabled: Option<bool>,
    pub ninja_mode: Option<bool>,
    pub location_mode: Option<bool>,
    pub personality: Option<String>,
}

impl SettingsPatch {
    /// Features this patch turns on, which the caller must be entitled to.
    pub fn requested_features(&self) -> Vec<FeatureId> {
        let mut requested = Vec::new();
        if self.ninja_mode == Some(true) {
            requested.push(FeatureId::NinjaMode);
        }
        if self.location_mode == Some(true) {
            requested.push(FeatureId::LocationMode);
        }
        if matches!(self.personality.as_deref(), Some(p) if !p.is_empty()) {
            requested.push(FeatureId::CustomPersonality);
        }
        requested
    }

    /// Merges the provided fields. Never touches `plan_tier`; only a plan
    /// change moves a user between tiers.
    pub fn apply(&self, settings: &mut UserSettings) {
        if let Some(name) = &self.display_name {
            settings.display_name = Some(name.clone()).filter(|n| !n.trim().is_empty());
        }
        if let Some(language) = &self.language {
            settings.language = language.clone();
        }
        if let Some(theme) = self.theme {
            settings.theme = theme;
        }
        if let Some(enabled) = self.notifications_enabled {
            settings.notifications_enabled = enabled;
        }
        if let Some(enabled) = self.ninja_mode {
            settings.ninja_mode = enabled;
        }
        if let Some(enabled) = self.location_mode {
            settings.location_mode = enabled;
        }
        if let Some(personality) = &self.personality {
            settings.personality = Some(personality.clone()).filter(|p| !p.is_empty());
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlanChangeRequest {
    pub tier: String,
}
