use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::config::Config;
use crate::error::AppResult;

const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then current = '' end
if current ~= ARGV[1] then return 0 end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Thin prefixed wrapper over a managed Redis connection.
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
    prefix: String,
}

impl Cache {
    pub async fn new(config: &Config) -> AppResult<Self> {
        let client = Client::open(config.redis_url())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: config.redis.key_prefix.clone(),
        })
    }

    fn key(&self, k: &str) -> String {
        format!("{}{}", self.prefix, k)
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(self.key(key)).await?)
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn get_u64(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(self.key(key)).await?;
        Ok(value.unwrap_or(0))
    }

    /// INCRBY and EXPIRE sent as one MULTI/EXEC, so a counter never
    /// exists without its expiry.
    pub async fn incr_with_expiry(&self, key: &str, delta: i64, ttl_secs: u64) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        let k = self.key(key);
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(&k, delta)
            .expire(&k, ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Writes `value` only if the key still holds `expected` (`None` means
    /// the key must not exist). Returns whether the write happened.
    pub async fn compare_and_set(&self, key: &str, expected: Option<&str>, value: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let swapped: i32 = redis::Script::new(COMPARE_AND_SET)
            .key(self.key(key))
            .arg(expected.unwrap_or(""))
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    pub async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}
