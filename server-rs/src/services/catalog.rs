//! Plan catalog: the static plan and upgrade-copy tables.
//!
//! The catalog is built once at startup, either from the built-in table or
//! from a JSON file, validated, and then shared read-only.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::plan::{
    FeatureId, PlanDefinition, PlanTier, QueryQuota, ResetPeriod, Restriction, UpgradeMessage,
};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No plan defined for tier {0}")]
    MissingTier(PlanTier),

    #[error("Tier {0} defined more than once")]
    DuplicateTier(PlanTier),

    #[error("Feature {feature} is in {lower} but missing from {higher}")]
    FeatureNotMonotonic {
        feature: FeatureId,
        lower: PlanTier,
        higher: PlanTier,
    },

    #[error("Restriction {restriction:?} is lifted in {lower} but applies again in {higher}")]
    RestrictionNotMonotonic {
        restriction: Restriction,
        lower: PlanTier,
        higher: PlanTier,
    },

    #[error("Upgrade message for {feature} names {declared} but the feature first appears in {actual:?}")]
    UpgradeTierMismatch {
        feature: FeatureId,
        declared: PlanTier,
        actual: Option<PlanTier>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCatalog {
    plans: Vec<PlanDefinition>,
    #[serde(default)]
    upgrade_messages: BTreeMap<FeatureId, UpgradeMessage>,
}

impl PlanCatalog {
    /// Sorts plans by tier and validates. Every constructor goes through here.
    pub fn new(
        mut plans: Vec<PlanDefinition>,
        upgrade_messages: BTreeMap<FeatureId, UpgradeMessage>,
    ) -> Result<Self, CatalogError> {
        plans.sort_by_key(|p| p.tier);
        let catalog = Self {
            plans,
            upgrade_messages,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let raw: PlanCatalog = serde_json::from_str(json)?;
        Self::new(raw.plans, raw.upgrade_messages)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json_str(&json)?;
        tracing::info!(
            "Loaded plan catalog from {} ({} plans, {} upgrade messages)",
            path.display(),
            catalog.plans.len(),
            catalog.upgrade_messages.len()
        );
        Ok(catalog)
    }

    /// The default table. Each tier's feature and restriction sets extend
    /// the previous tier's, so the upgrade path is monotonic by construction.
    pub fn builtin() -> Self {
        let free: BTreeSet<FeatureId> = [
            FeatureId::BasicChat,
            FeatureId::ChatHistory,
            FeatureId::VoiceInput,
        ]
        .into();
        let solo = extend(
            &free,
            [
                FeatureId::NinjaMode,
                FeatureId::LocationMode,
                FeatureId::CustomPersonality,
                FeatureId::FileUpload,
                FeatureId::PriorityResponses,
            ],
        );
        let team = extend(
            &solo,
            [
                FeatureId::ManageBrain,
                FeatureId::SharedBrain,
                FeatureId::TeamManagement,
                FeatureId::AdminDashboard,
                FeatureId::UsageAnalytics,
            ],
        );
        let enterprise: BTreeSet<FeatureId> = FeatureId::ALL.into();

        let solo_lifted: BTreeSet<Restriction> = [Restriction::HistoryLimit].into();
        let team_lifted = extend(
            &solo_lifted,
            [Restriction::FileSizeLimit, Restriction::SingleSeat],
        );
        let enterprise_lifted: BTreeSet<Restriction> = Restriction::ALL.into();

        let plans = vec![
            PlanDefinition {
                tier: PlanTier::Free,
                name: "Free".to_string(),
                query_quota: QueryQuota::Limited(20),
                reset_period: ResetPeriod::Week,
                features: free,
                disabled_restrictions: BTreeSet::new(),
            },
            PlanDefinition {
                tier: PlanTier::Solo,
                name: "Solo".to_string(),
                query_quota: QueryQuota::Limited(500),
                reset_period: ResetPeriod::Month,
                features: solo,
                disabled_restrictions: solo_lifted,
            },
            PlanDefinition {
                tier: PlanTier::Team,
                name: "Team".to_string(),
                query_quota: QueryQuota::Limited(2500),
                reset_period: ResetPeriod::Month,
                features: team,
                disabled_restrictions: team_lifted,
            },
            PlanDefinition {
                tier: PlanTier::Enterprise,
                name: "Enterprise".to_string(),
                query_quota: QueryQuota::Unlimited,
                reset_period: ResetPeriod::Month,
                features: enterprise,
                disabled_restrictions: enterprise_lifted,
            },
        ];

        let upgrade_messages = [
            (
                FeatureId::NinjaMode,
                "Ninja Mode",
                "Get faster, more focused answers with Ninja Mode. Available on Solo and above.",
                PlanTier::Solo,
            ),
            (
                FeatureId::LocationMode,
                "Location Mode",
                "Let the assistant use your location for nearby results. Available on Solo and above.",
                PlanTier::Solo,
            ),
            (
                FeatureId::CustomPersonality,
                "Custom Personality",
                "Choose how your assistant talks to you. Available on Solo and above.",
                PlanTier::Solo,
            ),
            (
                FeatureId::FileUpload,
                "File Uploads",
                "Attach documents and images to your conversations. Available on Solo and above.",
                PlanTier::Solo,
            ),
            (
                FeatureId::ManageBrain,
                "Manage Brain",
                "Curate what your assistant knows about your team. Available on Team and above.",
                PlanTier::Team,
            ),
            (
                FeatureId::SharedBrain,
                "Shared Brain",
                "Share one knowledge base across your whole team. Available on Team and above.",
                PlanTier::Team,
            ),
            (
                FeatureId::TeamManagement,
                "Team Management",
                "Invite teammates and manage their seats. Available on Team and above.",
                PlanTier::Team,
            ),
            (
                FeatureId::AdminDashboard,
                "Admin Dashboard",
                "See and control your workspace from one place. Available on Team and above.",
                PlanTier::Team,
            ),
            (
                FeatureId::UsageAnalytics,
                "Usage Analytics",
                "Track how your team uses the assistant. Available on Team and above.",
                PlanTier::Team,
            ),
            (
                FeatureId::Sso,
                "Single Sign-On",
                "Sign in through your identity provider. Available on Enterprise.",
                PlanTier::Enterprise,
            ),
            (
                FeatureId::AuditLogs,
                "Audit Logs",
                "Keep a complete record of workspace activity. Available on Enterprise.",
                PlanTier::Enterprise,
            ),
            (
                FeatureId::CustomIntegrations,
                "Custom Integrations",
                "Connect the assistant to your internal systems. Available on Enterprise.",
                PlanTier::Enterprise,
            ),
            (
                FeatureId::DedicatedSupport,
                "Dedicated Support",
                "Work with a named support engineer. Available on Enterprise.",
                PlanTier::Enterprise,
            ),
        ]
        .into_iter()
        .map(|(feature, title, message, minimum_tier)| {
            (
                feature,
                UpgradeMessage {
                    title: title.to_string(),
                    message: message.to_string(),
                    minimum_tier,
                },
            )
        })
        .collect();

        Self {
            plans,
            upgrade_messages,
        }
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        for (i, plan) in self.plans.iter().enumerate() {
            if self.plans[..i].iter().any(|p| p.tier == plan.tier) {
                return Err(CatalogError::DuplicateTier(plan.tier));
            }
        }
        for tier in PlanTier::ALL {
            if self.plan(tier).is_none() {
                return Err(CatalogError::MissingTier(tier));
            }
        }

        // Plans are sorted by tier, so adjacent pairs cover the whole chain.
        for pair in self.plans.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            if let Some(feature) = lower.features.difference(&higher.features).next() {
                return Err(CatalogError::FeatureNotMonotonic {
                    feature: *feature,
                    lower: lower.tier,
                    higher: higher.tier,
                });
            }
            if let Some(restriction) = lower
                .disabled_restrictions
                .difference(&higher.disabled_restrictions)
                .next()
            {
                return Err(CatalogError::RestrictionNotMonotonic {
                    restriction: *restriction,
                    lower: lower.tier,
                    higher: higher.tier,
                });
            }
        }

        for (feature, upgrade) in &self.upgrade_messages {
            let actual = self.minimum_tier_for(*feature);
            if actual != Some(upgrade.minimum_tier) {
                return Err(CatalogError::UpgradeTierMismatch {
                    feature: *feature,
                    declared: upgrade.minimum_tier,
                    actual,
                });
            }
        }

        Ok(())
    }

    pub fn plans(&self) -> &[PlanDefinition] {
        &self.plans
    }

    pub fn plan(&self, tier: PlanTier) -> Option<&PlanDefinition> {
        self.plans.iter().find(|p| p.tier == tier)
    }

    pub fn upgrade_message(&self, feature: FeatureId) -> Option<&UpgradeMessage> {
        self.upgrade_messages.get(&feature)
    }

    /// Lowest tier whose feature set contains `feature`.
    pub fn minimum_tier_for(&self, feature: FeatureId) -> Option<PlanTier> {
        self.plans
            .iter()
            .find(|p| p.has_feature(feature))
            .map(|p| p.tier)
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn extend<T: Ord + Copy, const N: usize>(base: &BTreeSet<T>, extra: [T; N]) -> BTreeSet<T> {
    let mut set = base.clone();
    set.extend(extra);
    set
}
