use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription level. Variants are declared in upgrade order, so the
/// derived `Ord` follows the capability superset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Solo,
    Team,
    Enterprise,
}

impl PlanTier {
    pub const ALL: [PlanTier; 4] = [
        PlanTier::Free,
        PlanTier::Solo,
        PlanTier::Team,
        PlanTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Solo => "solo",
            Self::Team => "team",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parses a stored or client-supplied tier. Anything but one of the four
    /// exact lowercase names resolves to `Free`.
    pub fn parse_or_free(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            tracing::debug!("Unrecognized plan tier {:?}, treating as free", raw);
            Self::Free
        })
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Free => Some(Self::Solo),
            Self::Solo => Some(Self::Team),
            Self::Team => Some(Self::Enterprise),
            Self::Enterprise => None,
        }
    }
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "solo" => Ok(Self::Solo),
            "team" => Ok(Self::Team),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!("Invalid plan tier: {}", s)),
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gated capability. The string forms are stable identifiers shared with
/// clients; new features are appended, never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureId {
    BasicChat,
    ChatHistory,
    VoiceInput,
    NinjaMode,
    LocationMode,
    CustomPersonality,
    FileUpload,
    PriorityResponses,
    ManageBrain,
    SharedBrain,
    TeamManagement,
    AdminDashboard,
    UsageAnalytics,
    Sso,
    AuditLogs,
    CustomIntegrations,
    DedicatedSupport,
}

impl FeatureId {
    pub const ALL: [FeatureId; 17] = [
        FeatureId::BasicChat,
        FeatureId::ChatHistory,
        FeatureId::VoiceInput,
        FeatureId::NinjaMode,
        FeatureId::LocationMode,
        FeatureId::CustomPersonality,
        FeatureId::FileUpload,
        FeatureId::PriorityResponses,
        FeatureId::ManageBrain,
        FeatureId::SharedBrain,
        FeatureId::TeamManagement,
        FeatureId::AdminDashboard,
        FeatureId::UsageAnalytics,
        FeatureId::Sso,
        FeatureId::AuditLogs,
        FeatureId::CustomIntegrations,
        FeatureId::DedicatedSupport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicChat => "basic_chat",
            Self::ChatHistory => "chat_history",
            Self::VoiceInput => "voice_input",
            Self::NinjaMode => "ninja_mode",
            Self::LocationMode => "location_mode",
            Self::CustomPersonality => "custom_personality",
            Self::FileUpload => "file_upload",
            Self::PriorityResponses => "priority_responses",
            Self::ManageBrain => "manage_brain",
            Self::SharedBrain => "shared_brain",
            Self::TeamManagement => "team_management",
            Self::AdminDashboard => "admin_dashboard",
            Self::UsageAnalytics => "usage_analytics",
            Self::Sso => "sso",
            Self::AuditLogs => "audit_logs",
            Self::CustomIntegrations => "custom_integrations",
            Self::DedicatedSupport => "dedicated_support",
        }
    }
}

impl FromStr for FeatureId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("Unknown feature: {}", s))
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits a plan can switch off. A restriction in a plan's
/// `disabled_restrictions` no longer applies to that plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    QueryLimit,
    HistoryLimit,
    FileSizeLimit,
    SingleSeat,
}

impl Restriction {
    pub const ALL: [Restriction; 4] = [
        Restriction::QueryLimit,
        Restriction::HistoryLimit,
        Restriction::FileSizeLimit,
        Restriction::SingleSeat,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    Week,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "max")]
pub enum QueryQuota {
    Limited(u64),
    Unlimited,
}

impl QueryQuota {
    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Limited(max) => Some(*max),
            Self::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDefinition {
    pub tier: PlanTier,
    pub name: String,
    pub query_quota: QueryQuota,
    pub reset_period: ResetPeriod,
    pub features: BTreeSet<FeatureId>,
    #[serde(default)]
    pub disabled_restrictions: BTreeSet<Restriction>,
}

impl PlanDefinition {
    pub fn has_feature(&self, feature: FeatureId) -> bool {
        self.features.contains(&feature)
    }

    pub fn is_restricted(&self, restriction: Restriction) -> bool {
        !self.disabled_restrictions.contains(&restriction)
    }
}

/// Copy shown when a user reaches for a feature their plan lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeMessage {
    pub title: String,
    pub message: String,
    pub minimum_tier: PlanTier,
}

impl UpgradeMessage {
    pub fn generic() -> Self {
        Self {
            title: "Premium Feature".to_string(),
            message: "Upgrade your plan to unlock this feature.".to_string(),
            minimum_tier: PlanTier::Solo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub feature: String,
    pub tier: PlanTier,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeMessage>,
}
