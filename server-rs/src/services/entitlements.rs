use std::sync::Arc;

use crate::models::plan::{AccessDecision, FeatureId, PlanDefinition, PlanTier, UpgradeMessage};
use crate::services::catalog::PlanCatalog;

/// Answers "may this tier use this feature, and if not, what upgrade
/// unlocks it". Pure lookups over an injected catalog; never fails.
/// Unknown tiers resolve as free and unknown features are denied.
#[derive(Debug, Clone)]
pub struct EntitlementResolver {
    catalog: Arc<PlanCatalog>,
}

impl EntitlementResolver {
    pub fn new(catalog: Arc<PlanCatalog>) -> Self {
        Self { catalog }
    }

    pub fn has_access(&self, tier: PlanTier, feature: FeatureId) -> bool {
        self.catalog
            .plan(tier)
            .map(|plan| plan.has_feature(feature))
            .unwrap_or(false)
    }

    pub fn has_access_raw(&self, tier: &str, feature: &str) -> bool {
        match feature.parse::<FeatureId>() {
            Ok(feature) => self.has_access(PlanTier::parse_or_free(tier), feature),
            Err(_) => {
                tracing::debug!("Denying unknown feature {:?}", feature);
                false
            }
        }
    }

    /// Registered upgrade copy, or the generic "Premium Feature" prompt.
    pub fn upgrade_info(&self, feature: FeatureId) -> UpgradeMessage {
        self.catalog
            .upgrade_message(feature)
            .cloned()
            .unwrap_or_else(UpgradeMessage::generic)
    }

    pub fn upgrade_info_raw(&self, feature: &str) -> UpgradeMessage {
        feature
            .parse::<FeatureId>()
            .map(|f| self.upgrade_info(f))
            .unwrap_or_else(|_| UpgradeMessage::generic())
    }

    pub fn check(&self, tier: PlanTier, feature: FeatureId) -> AccessDecision {
        let allowed = self.has_access(tier, feature);
        AccessDecision {
            feature: feature.to_string(),
            tier,
            allowed,
            upgrade: (!allowed).then(|| self.upgrade_info(feature)),
        }
    }

    pub fn check_raw(&self, tier: &str, feature: &str) -> AccessDecision {
        let tier = PlanTier::parse_or_free(tier);
        match feature.parse::<FeatureId>() {
            Ok(feature) => self.check(tier, feature),
            Err(_) => AccessDecision {
                feature: feature.to_string(),
                tier,
                allowed: false,
                upgrade: Some(UpgradeMessage::generic()),
            },
        }
    }

    pub fn features_for(&self, tier: PlanTier) -> Vec<FeatureId> {
        self.catalog
            .plan(tier)
            .map(|plan| plan.features.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn minimum_tier_for(&self, feature: FeatureId) -> Option<PlanTier> {
        self.catalog.minimum_tier_for(feature)
    }

    pub fn plans(&self) -> &[PlanDefinition] {
        self.catalog.plans()
    }

    pub fn plan(&self, tier: PlanTier) -> Option<&PlanDefinition> {
        self.catalog.plan(tier)
    }
}

impl Default for EntitlementResolver {
    fn default() -> Self {
        Self::new(Arc::new(PlanCatalog::builtin()))
    }
}
