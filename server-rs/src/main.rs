use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod cache;
mod config;
mod error;
mod middleware;
mod models;
mod routes;
mod services;

use cache::Cache;
use config::{Config, StoreBackend};
use error::{AppError, AppResult};
use middleware::rate_limit::RateLimiter;
use services::catalog::PlanCatalog;
use services::entitlements::EntitlementResolver;
use services::settings_store::{MemoryStore, RedisStore, SettingsStore};

#[derive(Clone)]
pub struct AppState {
    pub resolver: EntitlementResolver,
    pub store: Arc<dyn SettingsStore>,
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

fn build_router(state: AppState) -> Router {
    let entitlement_routes = Router::new()
        .route("/check", get(routes::entitlements::check))
        .route("/upgrade/:feature", get(routes::entitlements::upgrade_info));

    let user_routes = Router::new()
        .route(
            "/:user_id/entitlements",
            get(routes::entitlements::user_entitlements),
        )
        .route(
            "/:user_id/settings",
            get(routes::settings::get_settings).put(routes::settings::update_settings),
        )
        .route("/:user_id/plan", put(routes::settings::set_plan))
        .route("/:user_id/queries", post(routes::usage::consume_query))
        .route("/:user_id/usage", get(routes::usage::usage));

    let api = Router::new()
        .route("/plans", get(routes::plans::plans))
        .nest("/entitlements", entitlement_routes)
        .nest("/users", user_routes);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health::health))
        // Global middleware
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

async fn build_store(config: &Config) -> AppResult<Arc<dyn SettingsStore>> {
    match config.store_backend {
        StoreBackend::Redis => {
            let cache = Cache::new(config).await?;
            Ok(Arc::new(RedisStore::new(cache)))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    let catalog = match &config.plan_catalog_path {
        Some(path) => PlanCatalog::from_json_file(path)?,
        None => PlanCatalog::builtin(),
    };
    let store = build_store(&config).await?;
    let rate_limiter = RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_secs);

    tracing::info!(
        "Plan entitlements API initialized ({} plans, {} store)",
        catalog.plans().len(),
        store.backend()
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState {
        resolver: EntitlementResolver::new(Arc::new(catalog)),
        store,
        config: Arc::new(config),
        rate_limiter,
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind {addr}: {e}")))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| AppError::Internal(format!("Server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::models::settings::UserSettings;
    use crate::services::settings_store::{SettingsChange, SettingsMutation};

    /// Memory store whose updates first evaluate the edit against a stale
    /// read and stall when that read would switch ninja mode on, leaving a
    /// window for other requests before the real update runs.
    #[derive(Default)]
    struct LaggingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SettingsStore for LaggingStore {
        async fn get_settings(&self, user_id: &str) -> AppResult<Option<UserSettings>> {
            self.inner.get_settings(user_id).await
        }

        async fn update_settings(
            &self,
            user_id: &str,
            mutate: SettingsMutation<'_>,
        ) -> AppResult<SettingsChange> {
            let mut seen = self.inner.get_settings(user_id).await?.unwrap_or_default();
            if mutate(&mut seen).is_ok() && seen.ninja_mode {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.inner.update_settings(user_id, mutate).await
        }

        async fn usage(&self, user_id: &str, period_key: &str) -> AppResult<u64> {
            self.inner.usage(user_id, period_key).await
        }

        async fn try_consume(
            &self,
            user_id: &str,
            period_key: &str,
            limit: Option<u64>,
            ttl_secs: u64,
        ) -> AppResult<Option<u64>> {
            self.inner.try_consume(user_id, period_key, limit, ttl_secs).await
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn backend(&self) -> &'static str {
            "lagging"
        }
    }

    fn test_state(max_requests: u32) -> AppState {
        AppState {
            resolver: EntitlementResolver::default(),
            store: Arc::new(MemoryStore::new()),
            config: Arc::new(Config::default()),
            rate_limiter: RateLimiter::new(max_requests, 60),
        }
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_store() {
        let router = build_router(test_state(100));
        let (status, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn lists_plans_in_tier_order() {
        let router = build_router(test_state(100));
        let (status, body) = send(&router, Method::GET, "/api/v1/plans", None).await;
        assert_eq!(status, StatusCode::OK);
        let tiers: Vec<&str> = body["plans"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["tier"].as_str().unwrap())
            .collect();
        assert_eq!(tiers, ["free", "solo", "team", "enterprise"]);
        assert_eq!(body["featureTiers"]["ninja_mode"], "solo");
        assert_eq!(body["featureTiers"]["manage_brain"], "team");
    }

    #[tokio::test]
    async fn check_endpoint_denies_with_upgrade() {
        let router = build_router(test_state(100));
        let (status, body) = send(
            &router,
            Method::GET,
            "/api/v1/entitlements/check?tier=free&feature=ninja_mode",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], false);
        assert_eq!(body["upgrade"]["minimumTier"], "solo");

        let (_, body) = send(
            &router,
            Method::GET,
            "/api/v1/entitlements/check?tier=team&feature=location_mode",
            None,
        )
        .await;
        assert_eq!(body["allowed"], true);
        assert!(body.get("upgrade").is_none());
    }

    #[tokio::test]
    async fn check_endpoint_treats_unknown_tier_as_free() {
        let router = build_router(test_state(100));
        let (_, body) = send(
            &router,
            Method::GET,
            "/api/v1/entitlements/check?tier=platinum&feature=basic_chat",
            None,
        )
        .await;
        assert_eq!(body["tier"], "free");
        assert_eq!(body["allowed"], true);
    }

    #[tokio::test]
    async fn upgrade_endpoint_falls_back_for_unknown_feature() {
        let router = build_router(test_state(100));
        let (status, body) = send(
            &router,
            Method::GET,
            "/api/v1/entitlements/upgrade/nonexistent_feature",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Premium Feature");
        assert_eq!(body["minimumTier"], "solo");

        let (_, body) = send(&router, Method::GET, "/api/v1/entitlements/upgrade/manage_brain", None).await;
        assert_eq!(body["minimumTier"], "team");
    }

    #[tokio::test]
    async fn gated_setting_requires_upgrade() {
        let router = build_router(test_state(100));
        let (status, body) = send(
            &router,
            Method::PUT,
            "/api/v1/users/u1/settings",
            Some(json!({ "ninjaMode": true })),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["feature"], "ninja_mode");
        assert_eq!(body["upgrade"]["minimumTier"], "solo");

        // Ungated fields still save.
        let (status, body) = send(
            &router,
            Method::PUT,
            "/api/v1/users/u1/settings",
            Some(json!({ "theme": "dark", "displayName": "Ada" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["theme"], "dark");
        assert_eq!(body["ninjaMode"], false);
    }

    #[tokio::test]
    async fn upgrade_then_downgrade_revokes_toggles() {
        let router = build_router(test_state(100));
        let (status, _) = send(&router, Method::PUT, "/api/v1/users/u2/plan", Some(json!({ "tier": "solo" }))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &router,
            Method::PUT,
            "/api/v1/users/u2/settings",
            Some(json!({ "ninjaMode": true, "personality": "concise" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ninjaMode"], true);

        let (status, body) = send(&router, Method::PUT, "/api/v1/users/u2/plan", Some(json!({ "tier": "free" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["previousTier"], "solo");
        assert_eq!(body["revoked"], json!(["ninja_mode", "custom_personality"]));
        assert_eq!(body["settings"]["ninjaMode"], false);

        let (_, body) = send(&router, Method::GET, "/api/v1/users/u2/settings", None).await;
        assert_eq!(body["planTier"], "free");
        assert_eq!(body["personality"], Value::Null);
    }

    #[tokio::test]
    async fn downgrade_during_settings_patch_is_not_undone() {
        let store = Arc::new(LaggingStore::default());
        let router = build_router(AppState {
            store: store.clone(),
            ..test_state(100)
        });
        let (status, _) = send(&router, Method::PUT, "/api/v1/users/u6/plan", Some(json!({ "tier": "solo" }))).await;
        assert_eq!(status, StatusCode::OK);

        let patch = tokio::spawn({
            let router = router.clone();
            async move {
                send(
                    &router,
                    Method::PUT,
                    "/api/v1/users/u6/settings",
                    Some(json!({ "ninjaMode": true })),
                )
                .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (status, body) = send(&router, Method::PUT, "/api/v1/users/u6/plan", Some(json!({ "tier": "free" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["previousTier"], "solo");

        let (status, body) = patch.await.unwrap();
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["feature"], "ninja_mode");

        let stored = store.get_settings("u6").await.unwrap().unwrap();
        assert_eq!(stored.plan_tier, "free");
        assert!(!stored.ninja_mode);
    }

    #[tokio::test]
    async fn settings_patch_ignores_plan_tier() {
        let router = build_router(test_state(100));
        let (status, body) = send(
            &router,
            Method::PUT,
            "/api/v1/users/u7/settings",
            Some(json!({ "planTier": "enterprise", "theme": "light" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["planTier"], "free");
        assert_eq!(body["theme"], "light");
    }

    #[tokio::test]
    async fn plan_change_rejects_unknown_tier() {
        let router = build_router(test_state(100));
        let (status, body) = send(&router, Method::PUT, "/api/v1/users/u3/plan", Some(json!({ "tier": "gold" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("gold"));
    }

    #[tokio::test]
    async fn user_entitlements_reflect_stored_tier() {
        let router = build_router(test_state(100));
        let (_, body) = send(&router, Method::GET, "/api/v1/users/u4/entitlements", None).await;
        assert_eq!(body["tier"], "free");
        assert_eq!(body["features"].as_array().unwrap().len(), 3);
        assert_eq!(body["quota"]["limit"], 20);
        assert_eq!(body["restrictions"].as_array().unwrap().len(), 4);

        send(&router, Method::PUT, "/api/v1/users/u4/plan", Some(json!({ "tier": "team" }))).await;
        let (_, body) = send(&router, Method::GET, "/api/v1/users/u4/entitlements", None).await;
        assert_eq!(body["tier"], "team");
        assert!(body["features"].as_array().unwrap().contains(&json!("manage_brain")));
        assert_eq!(body["quota"]["period"], "month");
        assert_eq!(body["restrictions"], json!(["query_limit"]));
    }

    #[tokio::test]
    async fn queries_stop_at_quota() {
        let router = build_router(test_state(100));
        for i in 1..=20 {
            let (status, body) = send(&router, Method::POST, "/api/v1/users/u5/queries", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["used"], i);
        }

        let (status, body) = send(&router, Method::POST, "/api/v1/users/u5/queries", None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["quota"]["remaining"], 0);
        assert_eq!(body["upgrade"]["minimumTier"], "solo");

        let (_, body) = send(&router, Method::GET, "/api/v1/users/u5/usage", None).await;
        assert_eq!(body["used"], 20);
    }

    #[tokio::test]
    async fn rate_limiter_rejects_excess_requests() {
        let router = build_router(test_state(2));
        assert_eq!(send(&router, Method::GET, "/health", None).await.0, StatusCode::OK);
        assert_eq!(send(&router, Method::GET, "/health", None).await.0, StatusCode::OK);
        let (status, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Too many requests");
    }
}
