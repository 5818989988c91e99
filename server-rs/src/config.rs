use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub store_backend: StoreBackend,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitConfig,
    pub plan_catalog_path: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u8,
    pub key_prefix: String,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or_parse("PORT", 3000),
            cors_origins: env_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            store_backend: match env_or("STORE_BACKEND", "memory").to_lowercase().as_str() {
                "redis" => StoreBackend::Redis,
                _ => StoreBackend::Memory,
            },
            redis: RedisConfig {
                host: env_or("REDIS_HOST", "localhost"),
                port: env_or_parse("REDIS_PORT", 6379),
                password: env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
                db: env_or_parse("REDIS_DB", 0),
                key_prefix: env_or("REDIS_KEY_PREFIX", "entitlements:"),
            },
            rate_limit: RateLimitConfig {
                window_secs: env_or_parse("RATE_LIMIT_WINDOW_SECS", 60),
                max_requests: env_or_parse("RATE_LIMIT_MAX", 120),
            },
            plan_catalog_path: env::var("PLAN_CATALOG_PATH").ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn redis_url(&self) -> String {
        if let Ok(url) = env::var("REDIS_URL") {
            return url;
        }
        match &self.redis.password {
            Some(pw) if !pw.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                pw, self.redis.host, self.redis.port, self.redis.db
            ),
            _ => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            cors_origins: vec!["*".to_string()],
            store_backend: StoreBackend::Memory,
            redis: RedisConfig {
                host: "localhost".to_string(),
                port: 6379,
                password: None,
                db: 0,
                key_prefix: "entitlements:".to_string(),
            },
            rate_limit: RateLimitConfig {
                window_secs: 60,
                max_requests: 120,
            },
            plan_catalog_path: None,
        }
    }
}
