use super::lua_scripts::{INCREMENT_SCRIPT, TRANSITION_SCRIPT};
use super::store::CircuitStore;
use super::types::{CircuitRecord, CircuitState};
use crate::error::Result;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::Duration;
use tracing::{debug, warn};

/// Redis-backed circuit store shared by every process of a service
#[derive(Clone)]
pub struct RedisCircuitStore {
    /// Redis connection manager
    connection: ConnectionManager,
    /// Prefix for all circuit keys
    prefix: String,
    increment: Script,
    transition: Script,
}

struct Keys {
    state: String,
    failures: String,
    successes: String,
    opened_at: String,
}

impl RedisCircuitStore {
    /// Connect to Redis
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            increment: Script::new(INCREMENT_SCRIPT),
            transition: Script::new(TRANSITION_SCRIPT),
        })
    }

    fn keys(&self, dependency: &str) -> Keys {
        let base = format!("{}{}", self.prefix, dependency);
        Keys {
            state: format!("{}:state", base),
            failures: format!("{}:failures", base),
            successes: format!("{}:successes", base),
            opened_at: format!("{}:opened_at", base),
        }
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u32> {
        let mut connection = self.connection.clone();
        let count: i64 = self
            .increment
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut connection)
            .await?;
        Ok(count.max(0) as u32)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PEXPIRE rejects zero
    (ttl.as_millis() as u64).max(1)
}

fn parse_count(value: Option<String>) -> u32 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[async_trait]
impl CircuitStore for RedisCircuitStore {
    async fn load(&self, dependency: &str) -> Result<CircuitRecord> {
        let keys = self.keys(dependency);
        let mut connection = self.connection.clone();

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys.state)
            .arg(&keys.failures)
            .arg(&keys.successes)
            .arg(&keys.opened_at)
            .query_async(&mut connection)
            .await?;

        let mut values = values.into_iter();
        let state = match values.next().flatten() {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(dependency, error = %e, "Unreadable circuit state, treating as closed");
                CircuitState::Closed
            }),
            None => CircuitState::Closed,
        };
        let failure_count = parse_count(values.next().flatten());
        let success_count = parse_count(values.next().flatten());
        let opened_at = values.next().flatten().and_then(|v| v.parse().ok());

        debug!(dependency, %state, failure_count, success_count, "Loaded circuit record");

        Ok(CircuitRecord {
            state,
            failure_count,
            success_count,
            opened_at,
        })
    }

    async fn increment_failures(&self, dependency: &str, window: Duration) -> Result<u32> {
        let keys = self.keys(dependency);
        self.increment(&keys.failures, window).await
    }

    async fn increment_successes(&self, dependency: &str, ttl: Duration) -> Result<u32> {
        let keys = self.keys(dependency);
        self.increment(&keys.successes, ttl).await
    }

    async fn clear_failures(&self, dependency: &str) -> Result<()> {
        let keys = self.keys(dependency);
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(&keys.failures)
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }

    async fn transition(
        &self,
        dependency: &str,
        from: CircuitState,
        to: CircuitState,
        now_ms: i64,
        ttl: Duration,
    ) -> Result<bool> {
        let keys = self.keys(dependency);
        let mut connection = self.connection.clone();

        let applied: i64 = self
            .transition
            .key(&keys.state)
            .key(&keys.failures)
            .key(&keys.successes)
            .key(&keys.opened_at)
            .arg(from.as_str())
            .arg(to.as_str())
            .arg(now_ms)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut connection)
            .await?;

        Ok(applied == 1)
    }

    async fn reset(&self, dependency: &str) -> Result<()> {
        let keys = self.keys(dependency);
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(&keys.state)
            .arg(&keys.failures)
            .arg(&keys.successes)
            .arg(&keys.opened_at)
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }
}
