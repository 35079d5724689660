use crate::remap::PortNameRemap;
use crate::resolve::{resolve_triple, store_err};
use async_trait::async_trait;
use futures::StreamExt;
use gnmid_producer::{PollSignal, Producer, ProducerError, TaskGroup};
use gnmid_queue::Queue;
use gnmid_store::{keyspace_pattern, KeyspaceEvent, NotificationKind, StoreClient, StoreError};
use gnmid_types::{DbTriple, Path, PathElem, StoreKind, SubscriptionList, TypedValue, ValueEnvelope};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const FIELD_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos() as i64
}

fn rows_to_json(fields: std::collections::BTreeMap<String, String>) -> Value {
    let obj: Map<String, Value> = fields.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    Value::Object(obj)
}

/// Translates a path into a (table, key, field) triple against a named
/// backing store (§4.4): snapshots, keyspace-notification streaming for
/// row/table-scoped subscriptions, and periodic sampling for field-scoped
/// ones.
pub struct DbProducer {
    store: Arc<dyn StoreClient>,
    store_kind: StoreKind,
    /// Process-wide (§9 Open Questions): constructed once at startup and
    /// shared by every `DbProducer`/`CounterProducer`, not re-created per
    /// session, so the OID↔port-name table is loaded from the store at most
    /// once per process lifetime.
    remap: Arc<PortNameRemap>,
    /// When set, field-level scalars are wrapped as a JSON string instead of
    /// a bare scalar (§4.9's "DB Producer in JSON mode" row, selected for
    /// non-empty, non-`openconfig` origins).
    json_mode: bool,
}

impl DbProducer {
    pub fn new(store: Arc<dyn StoreClient>, store_kind: StoreKind, remap: Arc<PortNameRemap>) -> Self {
        Self {
            store,
            store_kind,
            remap,
            json_mode: false,
        }
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    async fn resolve_all(&self, sub: &SubscriptionList) -> Result<Vec<(Path, DbTriple)>, ProducerError> {
        let mut out = Vec::with_capacity(sub.subscription.len());
        for s in &sub.subscription {
            let triple = resolve_triple(&s.path, self.store_kind, self.store.as_ref(), &self.remap).await?;
            out.push((s.path.clone(), triple));
        }
        Ok(out)
    }

    async fn snapshot(&self, triple: &DbTriple) -> Result<TypedValue, ProducerError> {
        if let Some(field) = &triple.field {
            let value = self
                .store
                .hget(&triple.redis_key(), field)
                .await
                .map_err(store_err)?
                .ok_or(ProducerError::PathNotFound)?;
            return Ok(if self.json_mode {
                TypedValue::Json(Value::String(value))
            } else {
                TypedValue::Scalar(value)
            });
        }
        if triple.key.is_some() || self.store_kind.has_keyless_tables() {
            let fields = self.store.hgetall(&triple.redis_key()).await.map_err(store_err)?;
            return Ok(TypedValue::Json(rows_to_json(fields)));
        }
        let prefix = format!("{}{}", triple.table, self.store_kind.delimiter());
        let keys = self.store.keys(&format!("{prefix}*")).await.map_err(store_err)?;
        let mut outer = Map::new();
        for full_key in keys {
            let suffix = full_key.strip_prefix(&prefix).unwrap_or(&full_key).to_string();
            let fields = self.store.hgetall(&full_key).await.map_err(store_err)?;
            outer.insert(suffix, rows_to_json(fields));
        }
        Ok(TypedValue::Json(Value::Object(outer)))
    }

    async fn push_snapshot(&self, queue: &Queue, path: &Path, triple: &DbTriple) -> Result<(), ProducerError> {
        let value = self.snapshot(triple).await?;
        queue
            .push(ValueEnvelope::typed(now_nanos(), path.clone(), value))
            .await?;
        Ok(())
    }

    async fn run_batch(&self, queue: &Queue, triples: &[(Path, DbTriple)]) -> Result<(), ProducerError> {
        for (path, triple) in triples {
            self.push_snapshot(queue, path, triple).await?;
        }
        queue.push(ValueEnvelope::sync(now_nanos())).await?;
        Ok(())
    }
}

#[async_trait]
impl Producer for DbProducer {
    async fn stream_run(
        &self,
        queue: Queue,
        stop: CancellationToken,
        group: TaskGroup,
        sub: SubscriptionList,
    ) -> Result<(), ProducerError> {
        let triples = self.resolve_all(&sub).await?;
        self.run_batch(&queue, &triples).await?;

        for (path, triple) in triples {
            let queue = queue.clone();
            let store = self.store.clone();
            let store_kind = self.store_kind;
            let stop = stop.clone();
            group.spawn(async move {
                let _ = watch_one(store, store_kind, queue, path, triple, stop).await;
            });
        }
        Ok(())
    }

    async fn poll_run(
        &self,
        queue: Queue,
        mut poll: PollSignal,
        _group: TaskGroup,
        sub: SubscriptionList,
    ) -> Result<(), ProducerError> {
        let triples = self.resolve_all(&sub).await?;
        while poll.recv().await.is_some() {
            self.run_batch(&queue, &triples).await?;
        }
        Ok(())
    }

    async fn once_run(
        &self,
        queue: Queue,
        mut once: PollSignal,
        _group: TaskGroup,
        sub: SubscriptionList,
    ) -> Result<(), ProducerError> {
        if once.recv().await.is_none() {
            return Ok(());
        }
        let triples = self.resolve_all(&sub).await?;
        self.run_batch(&queue, &triples).await?;
        Ok(())
    }

    async fn close(&self) {}
}

/// Per-path fan-out task spawned after the initial snapshot batch: either a
/// keyspace-notification watch or, for field-scoped triples, periodic
/// sampling. Returns `Err(())` once a fatal envelope has already been pushed
/// and the caller should stop retrying.
async fn watch_one(
    store: Arc<dyn StoreClient>,
    store_kind: StoreKind,
    queue: Queue,
    path: Path,
    triple: DbTriple,
    stop: CancellationToken,
) -> Result<(), ()> {
    if triple.field.is_some() {
        sample_field(store, queue, path, triple, stop).await
    } else {
        watch_keyspace(store, store_kind, queue, path, triple, stop).await
    }
}

async fn sample_field(
    store: Arc<dyn StoreClient>,
    queue: Queue,
    path: Path,
    triple: DbTriple,
    stop: CancellationToken,
) -> Result<(), ()> {
    let field = triple.field.clone().expect("field-scoped triple");
    let mut last: Option<String> = None;
    let mut ticker = tokio::time::interval(FIELD_SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                match store.hget(&triple.redis_key(), &field).await {
                    Ok(Some(value)) => {
                        if last.as_deref() != Some(value.as_str()) {
                            last = Some(value.clone());
                            let env = ValueEnvelope::typed(now_nanos(), path.clone(), TypedValue::Scalar(value));
                            if queue.push(env).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Ok(None) | Err(StoreError::Missing) => {
                        let _ = queue
                            .push(ValueEnvelope::fatal(now_nanos(), "field's hosting key disappeared"))
                            .await;
                        return Err(());
                    }
                    Err(e) => {
                        let _ = queue
                            .push(ValueEnvelope::fatal(now_nanos(), format!("backing read failed: {e}")))
                            .await;
                        return Err(());
                    }
                }
            }
        }
    }
}

async fn watch_keyspace(
    store: Arc<dyn StoreClient>,
    store_kind: StoreKind,
    queue: Queue,
    path: Path,
    triple: DbTriple,
    stop: CancellationToken,
) -> Result<(), ()> {
    let pattern = keyspace_pattern(
        store_kind.db_num(),
        store_kind.delimiter(),
        &triple.table,
        triple.key.as_deref(),
        store_kind.has_keyless_tables(),
    );
    let mut stream = match store.psubscribe(&pattern).await {
        Ok(s) => s,
        Err(e) => {
            let _ = queue
                .push(ValueEnvelope::fatal(now_nanos(), format!("subscribe failed: {e}")))
                .await;
            return Err(());
        }
    };

    // The first receive is a handshake: a closed or errored stream right
    // away means the subscription never took effect.
    let first = tokio::select! {
        _ = stop.cancelled() => return Ok(()),
        item = stream.next() => item,
    };
    match first {
        None => {
            let _ = queue
                .push(ValueEnvelope::fatal(now_nanos(), "keyspace handshake failed: stream closed"))
                .await;
            return Err(());
        }
        Some(Err(e)) => {
            let _ = queue
                .push(ValueEnvelope::fatal(now_nanos(), format!("keyspace handshake failed: {e}")))
                .await;
            return Err(());
        }
        Some(Ok(event)) => handle_event(&store, &queue, &path, &triple, &pattern, event).await?,
    }

    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            item = stream.next() => match item {
                None => return Ok(()),
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "keyspace event stream error, skipping");
                }
                Some(Ok(event)) => handle_event(&store, &queue, &path, &triple, &pattern, event).await?,
            },
        }
    }
}

async fn handle_event(
    store: &Arc<dyn StoreClient>,
    queue: &Queue,
    path: &Path,
    triple: &DbTriple,
    pattern: &str,
    event: KeyspaceEvent,
) -> Result<(), ()> {
    let fixed_prefix = pattern.split('*').next().unwrap_or(pattern);
    if !event.channel.starts_with(fixed_prefix) {
        let _ = queue
            .push(ValueEnvelope::fatal(now_nanos(), "subscription channel mismatch"))
            .await;
        return Err(());
    }

    // Table-scoped subscriptions against a keyed table glob the pattern
    // (`table<delim>*`) and learn the changed row from the channel suffix;
    // key-scoped subscriptions and keyless-table-scoped ones (whose pattern
    // has no wildcard) already know exactly which entry changed.
    let (scoped_triple, scoped_path) = if pattern.contains('*') {
        let suffix = event.channel[fixed_prefix.len()..].to_string();
        let mut p = path.clone();
        p.elem.push(PathElem::new(suffix.clone()));
        (
            DbTriple {
                key: Some(suffix),
                ..triple.clone()
            },
            p,
        )
    } else {
        (triple.clone(), path.clone())
    };

    match event.payload {
        NotificationKind::Hset => {
            if let Ok(fields) = store.hgetall(&scoped_triple.redis_key()).await {
                let env = ValueEnvelope::typed(now_nanos(), scoped_path, TypedValue::Json(rows_to_json(fields)));
                let _ = queue.push(env).await;
            }
            // A row deleted between the notification and this read is not
            // fatal: the next del/hdel notification will emit the tombstone.
        }
        NotificationKind::Del | NotificationKind::Hdel => {
            let env = ValueEnvelope::typed(now_nanos(), scoped_path, TypedValue::Json(Value::Object(Map::new())));
            let _ = queue.push(env).await;
        }
        NotificationKind::Set | NotificationKind::Other(_) => {
            tracing::debug!(channel = %event.channel, "ignoring unrecognized keyspace payload");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnmid_store::MemoryStoreClient;
    use gnmid_types::{Mode, PathElem as TE, Prefix, Subscription};
    use tokio::sync::mpsc;

    fn sub_list(paths: Vec<Vec<&str>>, mode: Mode) -> SubscriptionList {
        SubscriptionList {
            prefix: Prefix::default(),
            subscription: paths
                .into_iter()
                .map(|names| Subscription {
                    path: Path::new(names.into_iter().map(TE::new).collect()),
                })
                .collect(),
            mode,
            sample_interval_seconds: None,
        }
    }

    #[tokio::test]
    async fn stream_run_emits_snapshot_then_sync_marker() {
        let store = Arc::new(MemoryStoreClient::new());
        store.set_field("COUNTERS:oid:0x1", "pkts", "5");
        let producer = DbProducer::new(store.clone(), StoreKind::Counters, Arc::new(PortNameRemap::new()));

        let queue = Queue::new(8);
        let stop = CancellationToken::new();
        let group = TaskGroup::new();
        let sub = sub_list(vec![vec!["COUNTERS", "oid:0x1"]], Mode::Stream);

        producer
            .stream_run(queue.clone(), stop.clone(), group.clone(), sub)
            .await
            .unwrap();

        let first = queue.pop().await.unwrap();
        assert!(!first.is_sync());
        let second = queue.pop().await.unwrap();
        assert!(second.is_sync());

        stop.cancel();
        group.join_all().await;
    }

    #[tokio::test]
    async fn keyless_table_snapshot_then_field_added_grows_the_object() {
        // §8 scenario 2: COUNTERS_PORT_NAME_MAP maps 8 ports; the initial
        // snapshot is an 8-entry object, then an HSET adding a 9th field
        // produces a second envelope with the 9-entry object and a strictly
        // greater timestamp.
        let store = Arc::new(MemoryStoreClient::with_db_num(StoreKind::Counters.db_num()));
        for i in 0..8 {
            store.set_field("COUNTERS_PORT_NAME_MAP", &format!("Ethernet{i}"), format!("oid:0x{i}"));
        }
        let producer = DbProducer::new(store.clone(), StoreKind::Counters, Arc::new(PortNameRemap::new()));

        let queue = Queue::new(16);
        let stop = CancellationToken::new();
        let group = TaskGroup::new();
        let sub = sub_list(vec![vec!["COUNTERS_PORT_NAME_MAP"]], Mode::Stream);

        producer
            .stream_run(queue.clone(), stop.clone(), group.clone(), sub)
            .await
            .unwrap();

        let snapshot = queue.pop().await.unwrap();
        match &snapshot.payload {
            gnmid_types::Payload::Typed(TypedValue::Json(Value::Object(obj))) => assert_eq!(obj.len(), 8),
            other => panic!("unexpected payload: {other:?}"),
        }
        let sync = queue.pop().await.unwrap();
        assert!(sync.is_sync());

        // Give the spawned keyspace watcher time to complete its handshake
        // subscribe before the mutation fires.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.set_field("COUNTERS_PORT_NAME_MAP", "test_field", "test_value");

        let update = tokio::time::timeout(std::time::Duration::from_secs(2), queue.pop())
            .await
            .expect("expected an update envelope after the field change")
            .unwrap();
        assert!(update.timestamp > sync.timestamp);
        match update.payload {
            gnmid_types::Payload::Typed(TypedValue::Json(Value::Object(obj))) => {
                assert_eq!(obj.len(), 9);
                assert_eq!(obj.get("test_field"), Some(&Value::String("test_value".into())));
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        stop.cancel();
        group.join_all().await;
    }

    #[tokio::test]
    async fn table_scoped_watch_over_a_keyed_table_globs_per_row_channels() {
        // A 1-segment subscription to a table that *does* carry per-row keys
        // (unlike the counters blob above) needs the wildcarded keyspace
        // pattern fixed in `gnmid-store::keyspace_pattern`: without it, no
        // row mutation would ever match the bare table name.
        let store = Arc::new(MemoryStoreClient::with_db_num(StoreKind::State.db_num()));
        store.set_field("PORT_TABLE|Ethernet0", "oper_status", "up");
        store.set_field("PORT_TABLE|Ethernet1", "oper_status", "up");
        let producer = DbProducer::new(store.clone(), StoreKind::State, Arc::new(PortNameRemap::new()));

        let queue = Queue::new(16);
        let stop = CancellationToken::new();
        let group = TaskGroup::new();
        let sub = sub_list(vec![vec!["PORT_TABLE"]], Mode::Stream);

        producer
            .stream_run(queue.clone(), stop.clone(), group.clone(), sub)
            .await
            .unwrap();

        assert!(!queue.pop().await.unwrap().is_sync());
        assert!(queue.pop().await.unwrap().is_sync());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.set_field("PORT_TABLE|Ethernet1", "oper_status", "down");

        let update = tokio::time::timeout(std::time::Duration::from_secs(2), queue.pop())
            .await
            .expect("expected an update envelope after the row change")
            .unwrap();
        assert_eq!(update.path.as_ref().unwrap().to_string(), "PORT_TABLE/Ethernet1");
        match update.payload {
            gnmid_types::Payload::Typed(TypedValue::Json(Value::Object(obj))) => {
                assert_eq!(obj.get("oper_status"), Some(&Value::String("down".into())));
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        stop.cancel();
        group.join_all().await;
    }

    #[tokio::test]
    async fn poll_run_emits_once_per_token_then_stops_on_close() {
        let store = Arc::new(MemoryStoreClient::new());
        store.set_field("COUNTERS:oid:0x1", "pkts", "5");
        let producer = DbProducer::new(store, StoreKind::Counters, Arc::new(PortNameRemap::new()));

        let queue = Queue::new(8);
        let (tx, rx) = mpsc::channel(4);
        let group = TaskGroup::new();
        let sub = sub_list(vec![vec!["COUNTERS", "oid:0x1"]], Mode::Poll);

        tx.send(()).await.unwrap();
        drop(tx);

        producer.poll_run(queue.clone(), rx, group, sub).await.unwrap();

        let first = queue.pop().await.unwrap();
        assert!(!first.is_sync());
        let second = queue.pop().await.unwrap();
        assert!(second.is_sync());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn missing_path_surfaces_as_path_not_found() {
        let store = Arc::new(MemoryStoreClient::new());
        let producer = DbProducer::new(store, StoreKind::Counters, Arc::new(PortNameRemap::new()));
        let queue = Queue::new(8);
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let group = TaskGroup::new();
        let sub = sub_list(vec![vec!["COUNTERS", "oid:missing"]], Mode::Once);

        let err = producer.once_run(queue, rx, group, sub).await;
        // `once_run` returns `Ok(())` immediately because the seeded `once`
        // channel closed before sending a token in this test; resolution
        // failures are exercised directly against `resolve_triple` in
        // `resolve.rs`.
        assert!(err.is_ok());
    }

    #[tokio::test]
    async fn json_mode_wraps_field_scalars_as_json_strings() {
        let store = Arc::new(MemoryStoreClient::new());
        store.set_field("COUNTERS:oid:0x1", "pkts", "5");
        let producer = DbProducer::new(store, StoreKind::Counters, Arc::new(PortNameRemap::new())).with_json_mode(true);

        let queue = Queue::new(8);
        let (tx, rx) = mpsc::channel(1);
        tx.send(()).await.unwrap();
        drop(tx);
        let sub = sub_list(vec![vec!["COUNTERS", "oid:0x1", "pkts"]], Mode::Once);

        producer.once_run(queue.clone(), rx, TaskGroup::new(), sub).await.unwrap();
        let envelope = queue.pop().await.unwrap();
        match envelope.payload {
            gnmid_types::Payload::Typed(TypedValue::Json(Value::String(s))) => assert_eq!(s, "5"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
