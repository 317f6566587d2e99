//! Redis store adapter.
//!
//! Maps every [`StoreAdapter`] primitive to one atomic Redis command:
//! `RPUSH`/`LPOP`/`BLPOP` for ordered collections, `SADD`/`SPOP` for
//! unordered collections, `SET NX PX`/`PEXPIRE` plus a compare-and-delete
//! script for leases, and incremental `SCAN` for key enumeration. Records
//! travel as JSON-encoded flat maps.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::RwLock;

use crate::codec::FieldMap;

use super::{StoreAdapter, StoreError};

/// Releases a lease only while it still belongs to the expected holder.
const DELETE_IF_MATCHES_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Floor for blocking pop timeouts; BLPOP treats 0 as "block forever".
const MIN_BLOCK_SECS: f64 = 0.05;

/// Redis-backed store adapter.
///
/// Keeps one multiplexed connection for regular commands, re-established
/// after dropped-connection or IO errors. Blocking pops take a dedicated
/// connection per call so they cannot stall commands pipelined on the
/// shared one.
pub struct RedisStore {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
        })
    }

    /// Get the shared connection, establishing it if needed.
    async fn get_connection(&self) -> Result<MultiplexedConnection, StoreError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }
        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                tracing::info!("redis store connection established");
                Ok(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to redis");
                Err(StoreError::Redis(e))
            }
        }
    }

    /// Record a command failure; dropped connections are cleared so the
    /// next call reconnects.
    async fn fail(&self, e: redis::RedisError) -> StoreError {
        if e.is_connection_dropped() || e.is_io_error() {
            let mut guard = self.connection.write().await;
            *guard = None;
        }
        StoreError::Redis(e)
    }

    fn encode(record: &FieldMap) -> Result<String, StoreError> {
        Ok(serde_json::to_string(record)?)
    }

    fn decode(raw: Option<String>) -> Result<Option<FieldMap>, StoreError> {
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl StoreAdapter for RedisStore {
    async fn push_tail(&self, key: &str, record: FieldMap) -> Result<(), StoreError> {
        let encoded = Self::encode(&record)?;
        let mut conn = self.get_connection().await?;

        match conn.rpush::<_, _, ()>(key, encoded).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn pop_head(&self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        let mut conn = self.get_connection().await?;

        match conn.lpop::<_, Option<String>>(key, None).await {
            Ok(raw) => Self::decode(raw),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn pop_head_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<FieldMap>, StoreError> {
        if timeout.is_zero() {
            return self.pop_head(key).await;
        }

        // Dedicated connection: BLPOP parks the whole connection server-side
        let mut conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(StoreError::Redis)?;

        let secs = timeout.as_secs_f64().max(MIN_BLOCK_SECS);
        let reply: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;

        Self::decode(reply.map(|(_, value)| value))
    }

    async fn add_to_set(&self, key: &str, record: FieldMap) -> Result<(), StoreError> {
        let encoded = Self::encode(&record)?;
        let mut conn = self.get_connection().await?;

        match conn.sadd::<_, _, ()>(key, encoded).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn remove_arbitrary_from_set(
        &self,
        key: &str,
    ) -> Result<Option<FieldMap>, StoreError> {
        let mut conn = self.get_connection().await?;

        let reply: Result<Option<String>, _> =
            redis::cmd("SPOP").arg(key).query_async(&mut conn).await;
        match reply {
            Ok(raw) => Self::decode(raw),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn set_if_absent_or_expired(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.get_connection().await?;

        // Expired keys are gone on the server, so NX alone gives
        // absent-or-expired semantics with the backend's clock.
        let reply: Result<Option<String>, _> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await;
        match reply {
            Ok(ok) => Ok(ok.is_some()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn renew_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.get_connection().await?;

        let reply: Result<i64, _> = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await;
        match reply {
            Ok(updated) => Ok(updated == 1),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn delete_if_matches(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.get_connection().await?;

        let script = redis::Script::new(DELETE_IF_MATCHES_SCRIPT);
        let reply: Result<i64, _> = script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await;
        match reply {
            Ok(removed) => Ok(removed == 1),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.get_connection().await?;

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let reply: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;
            let (next, batch) = match reply {
                Ok(r) => r,
                Err(e) => return Err(self.fail(e).await),
            };
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
