use super::lua_scripts::INCREMENT_SCRIPT;
use super::{BucketState, QueueState, StorageBackend};
use crate::error::Result;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use tracing::debug;

/// Namespace prefix for every key this backend touches.
const KEY_PREFIX: &str = "ratekeeper";

/// Redis-backed distributed storage backend.
///
/// Counters lean on Redis's atomic `INCR` (wrapped in a small Lua script so
/// the TTL is bound in the same step), timestamp logs on sorted sets. State
/// is shared across processes; cross-key operations are not transactional,
/// which is acceptable for a rate limiter.
#[derive(Clone)]
pub struct RedisBackend {
    /// Redis connection manager (cheap to clone, reconnects internally)
    connection: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis at `redis_url`.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    /// Test the Redis connection
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    fn counter_key(key: &str) -> String {
        format!("{KEY_PREFIX}:cnt:{key}")
    }

    fn log_key(key: &str) -> String {
        format!("{KEY_PREFIX}:log:{key}")
    }

    fn bucket_key(key: &str) -> String {
        format!("{KEY_PREFIX}:bkt:{key}")
    }

    fn queue_key(key: &str) -> String {
        format!("{KEY_PREFIX}:que:{key}")
    }

    /// Delete every key matching `pattern`, in batches.
    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(deleted)
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64> {
        let mut conn = self.connection.clone();
        let script = Script::new(INCREMENT_SCRIPT);

        let value: i64 = script
            .key(Self::counter_key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(value as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.connection.clone();
        let value: Option<u64> = conn.get(Self::counter_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: u64, window_ms: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::counter_key(key))
            .arg(value)
            .arg("PX")
            .arg(window_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(Self::counter_key(key))
            .arg(Self::log_key(key))
            .arg(Self::bucket_key(key))
            .arg(Self::queue_key(key))
            .query_async(&mut conn)
            .await?;

        // windowed counters derive their key as "{key}:{windowStart}"
        let pattern = format!("{}:*", Self::counter_key(key));
        let deleted = self.delete_matching(&pattern).await?;
        debug!(key, deleted, "Deleted rate limit state");
        Ok(())
    }

    async fn add_timestamp(&self, key: &str, timestamp_ms: u64, ttl_ms: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let log_key = Self::log_key(key);

        // Unique member so equal timestamps do not collapse in the set
        let member = format!("{}:{}", timestamp_ms, rand::random::<u32>());

        let _: () = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&log_key)
            .arg(timestamp_ms)
            .arg(member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&log_key)
            .arg(ttl_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_timestamps(&self, key: &str, min_ms: u64) -> Result<Vec<u64>> {
        let mut conn = self.connection.clone();

        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(Self::log_key(key))
            .arg(min_ms)
            .arg("+inf")
            .query_async(&mut conn)
            .await?;

        // members are "{timestamp}:{nonce}", returned in ascending score order
        Ok(members
            .iter()
            .filter_map(|m| m.split(':').next().and_then(|t| t.parse().ok()))
            .collect())
    }

    async fn remove_old_timestamps(&self, key: &str, min_ms: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("ZREMRANGEBYSCORE")
            .arg(Self::log_key(key))
            .arg("-inf")
            .arg(format!("({min_ms}"))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(Self::bucket_key(key)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_bucket(&self, key: &str, state: BucketState, ttl_ms: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(&state)?;
        let _: () = redis::cmd("SET")
            .arg(Self::bucket_key(key))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_queue(&self, key: &str) -> Result<Option<QueueState>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(Self::queue_key(key)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_queue(&self, key: &str, state: QueueState, ttl_ms: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(&state)?;
        let _: () = redis::cmd("SET")
            .arg(Self::queue_key(key))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let deleted = self.delete_matching(&format!("{KEY_PREFIX}:*")).await?;
        debug!(deleted, "Reset all rate limit keys");
        Ok(())
    }
}
