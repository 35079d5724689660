use crate::{KeyspaceEvent, KeyspaceStream, NotificationKind, StoreClient, StoreConnector, StoreError};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A thin wrapper around a multiplexed async Redis connection. This is the
/// only place in the workspace that names the `redis` crate: producers hold
/// a `Box<dyn StoreClient>` and never see this type.
pub struct RedisStoreClient {
    conn: ConnectionManager,
    client: redis::Client,
}

impl RedisStoreClient {
    pub async fn connect(addr: &str, db: i64) -> Result<Self, StoreError> {
        let url = format!("redis://{addr}/{db}");
        let client = redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn, client })
    }
}

#[async_trait]
impl StoreClient for RedisStoreClient {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        let map: BTreeMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if map.is_empty() {
            let exists: bool = conn
                .exists(key)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            if !exists {
                return Err(StoreError::Missing);
            }
        }
        Ok(map)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.keys(pattern)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set(key, value)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del(key)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<KeyspaceStream, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let pattern = pattern.to_string();
        let stream = pubsub.into_on_message().map(move |msg| {
            let channel: String = msg.get_channel_name().to_string();
            let payload: String = msg.get_payload().unwrap_or_default();
            if !channel_matches_pattern(&channel, &pattern) {
                return Err(StoreError::PatternMismatch {
                    expected: pattern.clone(),
                    actual: channel.clone(),
                });
            }
            Ok(KeyspaceEvent {
                channel,
                payload: NotificationKind::from_payload(&payload),
            })
        });
        Ok(Box::pin(stream))
    }
}

/// A [`StoreConnector`] that opens a fresh [`RedisStoreClient`] (its own
/// `ConnectionManager`) every time `connect` is called, per §3/§5: each
/// producer gets its own backing-store connection, never a shared handle.
pub struct RedisStoreConnector {
    address: String,
    db: i64,
}

impl RedisStoreConnector {
    pub fn new(address: impl Into<String>, db: i64) -> Self {
        Self { address: address.into(), db }
    }
}

#[async_trait]
impl StoreConnector for RedisStoreConnector {
    async fn connect(&self) -> Result<Arc<dyn StoreClient>, StoreError> {
        let client = RedisStoreClient::connect(&self.address, self.db).await?;
        Ok(Arc::new(client))
    }
}

/// `redis`'s glob-style `PSUBSCRIBE` pattern matcher is on the server side;
/// here we only defend against a channel shorter than the fixed prefix of the
/// pattern (§8: "silent skip, never a fatal" is the caller's job — this just
/// detects the mismatch so the caller can decide).
fn channel_matches_pattern(channel: &str, pattern: &str) -> bool {
    let fixed_prefix = pattern.split('*').next().unwrap_or(pattern);
    channel.len() >= fixed_prefix.len() && channel.starts_with(fixed_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_channel_does_not_match_prefix() {
        assert!(!channel_matches_pattern("__keyspace@2_", "__keyspace@2__:COUNTERS*"));
    }

    #[test]
    fn matching_channel_passes() {
        assert!(channel_matches_pattern(
            "__keyspace@2__:COUNTERS:oid:0x1",
            "__keyspace@2__:COUNTERS*"
        ));
    }
}
