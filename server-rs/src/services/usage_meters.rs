use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::plan::{PlanDefinition, PlanTier, ResetPeriod, UpgradeMessage};
use crate::services::entitlements::EntitlementResolver;
use crate::services::settings_store::SettingsStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub tier: PlanTier,
    pub period: ResetPeriod,
    pub period_key: String,
    pub used: u64,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub usage_pct: Option<f64>,
    pub resets_at: DateTime<Utc>,
}

/// Start and end of the quota period containing `now`. Weeks are ISO weeks
/// starting Monday 00:00 UTC; months start on the 1st at 00:00 UTC.
pub fn current_period(period: ResetPeriod, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    let (start, end) = match period {
        ResetPeriod::Week => {
            let start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            (start, start + Duration::days(7))
        }
        ResetPeriod::Month => {
            let start = today - Duration::days(today.day0() as i64);
            (start, start + Months::new(1))
        }
    };
    (
        Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN)),
        Utc.from_utc_datetime(&end.and_time(NaiveTime::MIN)),
    )
}

pub fn period_key(period: ResetPeriod, now: DateTime<Utc>) -> String {
    match period {
        ResetPeriod::Week => now.format("%G-W%V").to_string(),
        ResetPeriod::Month => now.format("%Y-%m").to_string(),
    }
}

pub fn status(plan: &PlanDefinition, used: u64, now: DateTime<Utc>) -> QuotaStatus {
    let (_, resets_at) = current_period(plan.reset_period, now);
    let limit = plan.query_quota.limit();
    let remaining = limit.map(|l| l.saturating_sub(used));
    let usage_pct = limit.map(|l| if l > 0 { used as f64 / l as f64 * 100.0 } else { 100.0 });

    QuotaStatus {
        tier: plan.tier,
        period: plan.reset_period,
        period_key: period_key(plan.reset_period, now),
        used,
        limit,
        remaining,
        usage_pct,
        resets_at,
    }
}

fn plan_for<'a>(resolver: &'a EntitlementResolver, tier: PlanTier) -> AppResult<&'a PlanDefinition> {
    resolver
        .plan(tier)
        .ok_or_else(|| AppError::Internal(format!("No plan definition for tier {}", tier)))
}

pub async fn get_status(
    store: &dyn SettingsStore,
    resolver: &EntitlementResolver,
    user_id: &str,
    tier: PlanTier,
    now: DateTime<Utc>,
) -> AppResult<QuotaStatus> {
    let plan = plan_for(resolver, tier)?;
    let used = store
        .usage(user_id, &period_key(plan.reset_period, now))
        .await?;
    Ok(status(plan, used, now))
}

/// Counts one query against the user's quota. Fails with `QuotaExceeded`
/// once the period's limit is reached; the counter never exceeds the limit.
pub async fn consume(
    store: &dyn SettingsStore,
    resolver: &EntitlementResolver,
    user_id: &str,
    tier: PlanTier,
    now: DateTime<Utc>,
) -> AppResult<QuotaStatus> {
    let plan = plan_for(resolver, tier)?;
    let key = period_key(plan.reset_period, now);
    let (_, end) = current_period(plan.reset_period, now);
    // Keep counters a day past the period end so late reads still see them.
    let ttl_secs = (end - now).num_seconds().max(0) as u64 + 86_400;
    let limit = plan.query_quota.limit();

    match store.try_consume(user_id, &key, limit, ttl_secs).await? {
        Some(used) => Ok(status(plan, used, now)),
        None => {
            tracing::info!("User {} exhausted {} quota for {}", user_id, tier, key);
            let used = limit.unwrap_or_default();
            Err(AppError::QuotaExceeded {
                status: status(plan, used, now),
                upgrade: quota_upgrade(resolver, tier),
            })
        }
    }
}

fn quota_upgrade(resolver: &EntitlementResolver, tier: PlanTier) -> Option<UpgradeMessage> {
    let next = tier.next()?;
    let plan = resolver.plan(next)?;
    let allowance = match plan.query_quota.limit() {
        Some(max) => format!(
            "{} queries per {}",
            max,
            match plan.reset_period {
                ResetPeriod::Week => "week",
                ResetPeriod::Month => "month",
            }
        ),
        None => "unlimited queries".to_string(),
    };
    Some(UpgradeMessage {
        title: "Query limit reached".to_string(),
        message: format!("Upgrade to {} for {}.", plan.name, allowance),
        minimum_tier: next,
    })
}
