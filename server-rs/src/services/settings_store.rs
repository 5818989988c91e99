use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::cache::Cache;
use crate::error::{AppError, AppResult};
use crate::models::settings::UserSettings;

/// Edit applied to the settings as currently stored. An `Err` aborts the
/// update and nothing is written.
pub type SettingsMutation<'a> = &'a (dyn Fn(&mut UserSettings) -> AppResult<()> + Send + Sync);

/// Stored settings before and after an atomic update.
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub before: UserSettings,
    pub after: UserSettings,
}

const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Persistence for per-user settings and per-period query counters.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self, user_id: &str) -> AppResult<Option<UserSettings>>;

    /// Read-modify-write of one user's settings that no concurrent update
    /// can interleave with. A user with nothing stored starts from
    /// defaults. `mutate` may run more than once on backends that retry.
    async fn update_settings(
        &self,
        user_id: &str,
        mutate: SettingsMutation<'_>,
    ) -> AppResult<SettingsChange>;

    /// Queries counted for `user_id` in the period named by `period_key`.
    async fn usage(&self, user_id: &str, period_key: &str) -> AppResult<u64>;

    /// Adds one to the period counter unless that would pass `limit`.
    /// Returns the new count, or `None` if the quota is already used up.
    async fn try_consume(
        &self,
        user_id: &str,
        period_key: &str,
        limit: Option<u64>,
        ttl_secs: u64,
    ) -> AppResult<Option<u64>>;

    async fn health_check(&self) -> bool;

    fn backend(&self) -> &'static str;
}

fn usage_key(user_id: &str, period_key: &str) -> String {
    format!("usage:{}:{}", user_id, period_key)
}

fn settings_key(user_id: &str) -> String {
    format!("settings:{}", user_id)
}

fn within_limit(count: u64, limit: Option<u64>) -> bool {
    limit.map_or(true, |max| count <= max)
}

fn apply_mutation(before: &UserSettings, mutate: SettingsMutation<'_>) -> AppResult<UserSettings> {
    let mut after = before.clone();
    mutate(&mut after)?;
    after.updated_at = Utc::now();
    Ok(after)
}

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryStore {
    settings: Mutex<HashMap<String, UserSettings>>,
    counters: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_settings(&self, user_id: &str) -> AppResult<Option<UserSettings>> {
        Ok(self.settings.lock().await.get(user_id).cloned())
    }

    async fn update_settings(
        &self,
        user_id: &str,
        mutate: SettingsMutation<'_>,
    ) -> AppResult<SettingsChange> {
        let mut settings = self.settings.lock().await;
        let before = settings.get(user_id).cloned().unwrap_or_default();
        let after = apply_mutation(&before, mutate)?;
        settings.insert(user_id.to_string(), after.clone());
        Ok(SettingsChange { before, after })
    }

    async fn usage(&self, user_id: &str, period_key: &str) -> AppResult<u64> {
        let counters = self.counters.lock().await;
        let count = counters
            .get(&usage_key(user_id, period_key))
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.count)
            .unwrap_or(0);
        Ok(count)
    }

    async fn try_consume(
        &self,
        user_id: &str,
        period_key: &str,
        limit: Option<u64>,
        ttl_secs: u64,
    ) -> AppResult<Option<u64>> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        counters.retain(|_, e| e.expires_at > now);

        let entry = counters
            .entry(usage_key(user_id, period_key))
            .or_insert(CounterEntry {
                count: 0,
                expires_at: now + Duration::from_secs(ttl_secs),
            });

        if !within_limit(entry.count + 1, limit) {
            return Ok(None);
        }
        entry.count += 1;
        Ok(Some(entry.count))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

pub struct RedisStore {
    cache: Cache,
}

impl RedisStore {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl SettingsStore for RedisStore {
    async fn get_settings(&self, user_id: &str) -> AppResult<Option<UserSettings>> {
        self.cache.get_json(&settings_key(user_id)).await
    }

    /// Optimistic update: the write only lands if the stored JSON is still
    /// the one `mutate` saw, otherwise it re-reads and tries again.
    async fn update_settings(
        &self,
        user_id: &str,
        mutate: SettingsMutation<'_>,
    ) -> AppResult<SettingsChange> {
        let key = settings_key(user_id);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let raw = self.cache.get(&key).await?;
            let before: UserSettings = match raw.as_deref() {
                Some(json) => serde_json::from_str(json)?,
                None => UserSettings::default(),
            };
            let after = apply_mutation(&before, mutate)?;
            let json = serde_json::to_string(&after)?;

            if self.cache.compare_and_set(&key, raw.as_deref(), &json).await? {
                return Ok(SettingsChange { before, after });
            }
            tracing::debug!("Settings for {} changed concurrently (attempt {})", user_id, attempt);
        }
        Err(AppError::Conflict(format!(
            "Settings for {} are being changed concurrently, retry later",
            user_id
        )))
    }

    async fn usage(&self, user_id: &str, period_key: &str) -> AppResult<u64> {
        self.cache.get_u64(&usage_key(user_id, period_key)).await
    }

    async fn try_consume(
        &self,
        user_id: &str,
        period_key: &str,
        limit: Option<u64>,
        ttl_secs: u64,
    ) -> AppResult<Option<u64>> {
        let key = usage_key(user_id, period_key);
        let count = self.cache.incr_with_expiry(&key, 1, ttl_secs).await?;
        let count = count.max(0) as u64;

        if within_limit(count, limit) {
            return Ok(Some(count));
        }
        // Roll back so the counter stays at the limit.
        self.cache.incr_with_expiry(&key, -1, ttl_secs).await?;
        Ok(None)
    }

    async fn health_check(&self) -> bool {
        self.cache.health_check().await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;

    fn set_name(name: &'static str) -> impl Fn(&mut UserSettings) -> AppResult<()> + Send + Sync {
        move |s: &mut UserSettings| {
            s.display_name = Some(name.to_string());
            Ok(())
        }
    }

    async fn bump_counter_name(store: &dyn SettingsStore, user_id: &str) {
        store
            .update_settings(user_id, &|s: &mut UserSettings| {
                let n: u32 = s.display_name.as_deref().unwrap_or("0").parse().unwrap_or(0);
                s.display_name = Some((n + 1).to_string());
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn settings_round_trip_per_user() {
        let store = MemoryStore::new();
        assert!(store.get_settings("a").await.unwrap().is_none());

        let change = store.update_settings("a", &set_name("Ada")).await.unwrap();
        assert_eq!(change.before.display_name, None);
        assert_eq!(change.after.display_name.as_deref(), Some("Ada"));

        assert_eq!(store.get_settings("a").await.unwrap(), Some(change.after));
        assert!(store.get_settings("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_update_writes_nothing() {
        let store = MemoryStore::new();
        store.update_settings("a", &set_name("Ada")).await.unwrap();

        let result = store
            .update_settings("a", &|s: &mut UserSettings| {
                s.display_name = Some("Grace".into());
                Err(AppError::BadRequest("rejected".into()))
            })
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        let stored = store.get_settings("a").await.unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Ada"));
        assert!(store.get_settings("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { bump_counter_name(store.as_ref(), "a").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.get_settings("a").await.unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn counters_are_scoped_by_period() {
        let store = MemoryStore::new();
        store.try_consume("a", "2026-10", Some(3), 60).await.unwrap();
        store.try_consume("a", "2026-10", Some(3), 60).await.unwrap();
        store.try_consume("a", "2026-11", Some(3), 60).await.unwrap();

        assert_eq!(store.usage("a", "2026-10").await.unwrap(), 2);
        assert_eq!(store.usage("a", "2026-11").await.unwrap(), 1);
        assert_eq!(store.usage("b", "2026-10").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn try_consume_refuses_past_limit() {
        let store = MemoryStore::new();
        assert_eq!(store.try_consume("a", "p", Some(2), 60).await.unwrap(), Some(1));
        assert_eq!(store.try_consume("a", "p", Some(2), 60).await.unwrap(), Some(2));
        assert_eq!(store.try_consume("a", "p", Some(2), 60).await.unwrap(), None);
        assert_eq!(store.usage("a", "p").await.unwrap(), 2);

        assert_eq!(store.try_consume("a", "q", None, 60).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn expired_counters_reset() {
        let store = MemoryStore::new();
        store.try_consume("a", "p", Some(1), 0).await.unwrap();
        assert_eq!(store.usage("a", "p").await.unwrap(), 0);
        assert_eq!(store.try_consume("a", "p", Some(1), 0).await.unwrap(), Some(1));
    }

    #[test]
    fn limit_is_inclusive() {
        assert!(within_limit(20, Some(20)));
        assert!(!within_limit(21, Some(20)));
        assert!(!within_limit(1, Some(0)));
        assert!(within_limit(u64::MAX, None));
    }

    // The tests below need a live server: `REDIS_URL=redis://localhost cargo test -- --ignored`.

    async fn redis_store() -> RedisStore {
        let mut config = Config::default();
        config.redis.key_prefix = format!("entitlements-test:{}:", Utc::now().timestamp_nanos_opt().unwrap_or(0));
        RedisStore::new(Cache::new(&config).await.unwrap())
    }

    #[tokio::test]
    #[ignore]
    async fn redis_counter_rolls_back_at_limit() {
        let store = redis_store().await;
        assert_eq!(store.try_consume("a", "p", Some(2), 60).await.unwrap(), Some(1));
        assert_eq!(store.try_consume("a", "p", Some(2), 60).await.unwrap(), Some(2));
        assert_eq!(store.try_consume("a", "p", Some(2), 60).await.unwrap(), None);
        assert_eq!(store.try_consume("a", "p", Some(2), 60).await.unwrap(), None);
        assert_eq!(store.usage("a", "p").await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore]
    async fn redis_concurrent_updates_are_not_lost() {
        let store = Arc::new(redis_store().await);
        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { bump_counter_name(store.as_ref(), "a").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.get_settings("a").await.unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("5"));
    }
}
