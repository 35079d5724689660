use crate::{KeyspaceEvent, KeyspaceStream, NotificationKind, StoreClient, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

const NOTIFY_CAPACITY: usize = 1024;

struct Inner {
    tables: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    strings: Mutex<BTreeMap<String, String>>,
    notify: broadcast::Sender<KeyspaceEvent>,
    db_num: u8,
}

/// An in-memory [`StoreClient`] double for tests and integration scenarios.
/// Mutations are made through [`MemoryStoreClient::set_field`] /
/// [`MemoryStoreClient::del_field`], which both apply the change and publish
/// the matching keyspace notification, exactly as the real store's keyspace
/// events are driven by its own mutations.
///
/// Defaults to db number 0; use [`MemoryStoreClient::with_db_num`] to match a
/// [`crate::keyspace_pattern`] built from a non-zero `StoreKind::db_num()` (all
/// three real store kinds use one), since a produced pattern's embedded db
/// number must agree with this double's published channels for the
/// handshake check in `DbProducer::watch_keyspace` to pass.
#[derive(Clone)]
pub struct MemoryStoreClient {
    inner: Arc<Inner>,
}

impl Default for MemoryStoreClient {
    fn default() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(BTreeMap::new()),
                strings: Mutex::new(BTreeMap::new()),
                notify,
                db_num: 0,
            }),
        }
    }
}

impl MemoryStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_db_num(db_num: u8) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(BTreeMap::new()),
                strings: Mutex::new(BTreeMap::new()),
                notify,
                db_num,
            }),
        }
    }

    /// Seeds (or overwrites) a whole row without emitting a notification.
    /// Used to set up scenario fixtures before a subscription is opened.
    pub fn seed(&self, key: &str, fields: impl IntoIterator<Item = (String, String)>) {
        self.inner
            .tables
            .lock()
            .entry(key.to_string())
            .or_default()
            .extend(fields);
    }

    pub fn set_field(&self, key: &str, field: &str, value: impl Into<String>) {
        self.inner
            .tables
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
        self.publish(key, NotificationKind::Hset);
    }

    pub fn del_field(&self, key: &str, field: &str) {
        let mut tables = self.inner.tables.lock();
        if let Some(row) = tables.get_mut(key) {
            row.remove(field);
        }
        drop(tables);
        self.publish(key, NotificationKind::Hdel);
    }

    /// Reads back a plain string key, for asserting on liveness-key fixtures
    /// in tests without going through the full [`StoreClient`] trait object.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.inner.strings.lock().get(key).cloned()
    }

    pub fn del_key(&self, key: &str) {
        self.inner.tables.lock().remove(key);
        self.publish(key, NotificationKind::Del);
    }

    fn publish(&self, key: &str, kind: NotificationKind) {
        let channel = format!("__keyspace@{}__:{key}", self.inner.db_num);
        let _ = self.inner.notify.send(KeyspaceEvent { channel, payload: kind });
    }
}

#[async_trait]
impl StoreClient for MemoryStoreClient {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .tables
            .lock()
            .get(key)
            .and_then(|row| row.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        self.inner
            .tables
            .lock()
            .get(key)
            .cloned()
            .ok_or(StoreError::Missing)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let fixed_prefix = pattern.split('*').next().unwrap_or(pattern);
        Ok(self
            .inner
            .tables
            .lock()
            .keys()
            .filter(|k| k.starts_with(fixed_prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.tables.lock().contains_key(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.strings.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.strings.lock().remove(key);
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<KeyspaceStream, StoreError> {
        let ns_prefix = format!("__keyspace@{}__:", self.inner.db_num);
        let fixed_prefix = pattern
            .strip_prefix(ns_prefix.as_str())
            .unwrap_or(pattern)
            .split('*')
            .next()
            .unwrap_or(pattern)
            .to_string();
        let full_prefix = format!("{ns_prefix}{fixed_prefix}");
        let rx = self.inner.notify.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(event) if event.channel.starts_with(&full_prefix) => Some(Ok(event)),
            Ok(_) => None,
            Err(_lagged) => Some(Err(StoreError::Connection("subscriber lagged".into()))),
        });
        Ok(Box::pin(stream))
    }
}
