//! The backing data store contract consumed (not implemented) by producers
//! (§6): `HGET`, `HGETALL`, `KEYS`, `EXISTS`, and a keyspace-notification
//! `PSUBSCRIBE`. Producers never talk to `redis` (or anything else)
//! directly; they hold a `Box<dyn StoreClient>`.

mod memory;
mod redis_client;

pub use memory::MemoryStoreClient;
pub use redis_client::{RedisStoreClient, RedisStoreConnector};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found")]
    Missing,
    #[error("backing store connection error: {0}")]
    Connection(String),
    #[error("keyspace subscription channel {actual} did not match declared pattern {expected}")]
    PatternMismatch { expected: String, actual: String },
}

/// The payload of a keyspace-notification event, as published by the store
/// on key/field mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    Set,
    Del,
    Hset,
    Hdel,
    Other(String),
}

impl NotificationKind {
    pub fn from_payload(payload: &str) -> Self {
        match payload {
            "set" => NotificationKind::Set,
            "del" => NotificationKind::Del,
            "hset" => NotificationKind::Hset,
            "hdel" => NotificationKind::Hdel,
            other => NotificationKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceEvent {
    pub channel: String,
    pub payload: NotificationKind,
}

pub type KeyspaceStream = BoxStream<'static, Result<KeyspaceEvent, StoreError>>;

/// Derives the keyspace-notification pattern for a DB number and table
/// prefix, per §3: `__keyspace@<dbNum>__:<tablePrefix>[<delim><keyPart>]*`.
/// `key_part` is omitted for keyless tables (the counters store, see §4.4).
///
/// A table-scoped subscription (`key_part: None`) against a table that does
/// carry per-row keys needs a trailing glob so the pattern matches every
/// row's channel, not just the bare table name; a genuinely keyless,
/// single-blob table (`table_is_keyless`) has no rows to glob over, so its
/// pattern stays an exact match.
pub fn keyspace_pattern(db_num: u8, delimiter: &str, table: &str, key_part: Option<&str>, table_is_keyless: bool) -> String {
    match key_part {
        Some(k) => format!("__keyspace@{db_num}__:{table}{delimiter}{k}"),
        None if table_is_keyless => format!("__keyspace@{db_num}__:{table}"),
        None => format!("__keyspace@{db_num}__:{table}{delimiter}*"),
    }
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn psubscribe(&self, pattern: &str) -> Result<KeyspaceStream, StoreError>;

    /// Writes a plain string key (§6's persisted-liveness key is the only
    /// caller in this workspace; producers never call this). Not part of the
    /// read-side contract §6 spells out for the producer path.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Opens a backing-store connection on demand. §3/§5: "the backing-store
/// client connection is owned by the producer for its lifetime... never
/// shared across sessions; each producer opens its own." A `StoreRegistry`
/// holds one connector per `StoreKind`, configured once at startup; each
/// producer calls `connect` when it is constructed rather than receiving an
/// already-open, possibly-shared handle.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn StoreClient>, StoreError>;
}

/// A [`StoreConnector`] that hands out clones of one pre-built handle,
/// rather than opening a fresh connection each time. Used for in-process
/// test doubles like [`MemoryStoreClient`], where "another connection"
/// means another reference to the same in-memory dataset, not a new socket
/// — exactly as separate real connections to one store instance all reach
/// the same keyspace.
pub struct StaticStoreConnector(Arc<dyn StoreClient>);

impl StaticStoreConnector {
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        Self(client)
    }
}

#[async_trait]
impl StoreConnector for StaticStoreConnector {
    async fn connect(&self) -> Result<Arc<dyn StoreClient>, StoreError> {
        Ok(self.0.clone())
    }
}
