use crate::remap::PortNameRemap;
use crate::resolve::{resolve_triple, store_err};
use async_trait::async_trait;
use gnmid_producer::{PollSignal, Producer, ProducerError, TaskGroup};
use gnmid_queue::Queue;
use gnmid_store::StoreClient;
use gnmid_types::{DbTriple, Path, StoreKind, SubscriptionList, TypedValue, ValueEnvelope};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos() as i64
}

type Sample = (Path, BTreeMap<String, i64>);

/// Periodic snapshot-with-diff producer (§4.5): answers "counters of X over
/// the last N seconds". Each entity is a resolved (table, key) triple with
/// no field; the emitted value is either the absolute reading (first sample,
/// or every sample when `interval` is zero/unset) or the per-field
/// difference between two successive samples.
pub struct CounterProducer {
    store: Arc<dyn StoreClient>,
    store_kind: StoreKind,
    /// Process-wide (§9 Open Questions): shared with every other producer
    /// rather than constructed per session; see `DbProducer`'s field of the
    /// same name.
    remap: Arc<PortNameRemap>,
    interval: Option<Duration>,
}

impl CounterProducer {
    pub fn new(store: Arc<dyn StoreClient>, store_kind: StoreKind, interval: Option<Duration>, remap: Arc<PortNameRemap>) -> Self {
        Self {
            store,
            store_kind,
            remap,
            interval,
        }
    }

    async fn resolve_entities(&self, sub: &SubscriptionList) -> Result<Vec<(Path, DbTriple)>, ProducerError> {
        let mut out = Vec::with_capacity(sub.subscription.len());
        for s in &sub.subscription {
            let triple = resolve_triple(&s.path, self.store_kind, self.store.as_ref(), &self.remap).await?;
            out.push((s.path.clone(), triple));
        }
        Ok(out)
    }

    async fn sample(&self, entities: &[(Path, DbTriple)]) -> Vec<Sample> {
        let mut out = Vec::with_capacity(entities.len());
        for (path, triple) in entities {
            // An entity whose row has disappeared is omitted entirely,
            // per §4.5's edge policy; it is not a fatal condition here
            // (unlike the field-scoped sampler in `db.rs`).
            if let Ok(fields) = self.store.hgetall(&triple.redis_key()).await.map_err(store_err) {
                let parsed = fields
                    .into_iter()
                    .map(|(k, v)| (k, v.parse::<i64>().unwrap_or(0)))
                    .collect();
                out.push((path.clone(), parsed));
            }
        }
        out
    }

    async fn emit_absolute(&self, queue: &Queue, samples: &[Sample]) -> Result<(), ProducerError> {
        for (path, fields) in samples {
            let obj: Map<String, Value> = fields.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect();
            queue
                .push(ValueEnvelope::typed(now_nanos(), path.clone(), TypedValue::Json(Value::Object(obj))))
                .await?;
        }
        Ok(())
    }

    async fn emit_diff(&self, queue: &Queue, first: &[Sample], second: &[Sample]) -> Result<(), ProducerError> {
        let second_by_path: HashMap<String, &BTreeMap<String, i64>> =
            second.iter().map(|(p, f)| (p.to_string(), f)).collect();

        for (path, first_fields) in first {
            let second_fields = match second_by_path.get(&path.to_string()) {
                Some(f) => f,
                None => continue,
            };
            let field_names: BTreeSet<&String> = first_fields.keys().chain(second_fields.keys()).collect();
            let mut diff = Map::new();
            for name in field_names {
                let before = first_fields.get(name).copied().unwrap_or(0);
                let after = second_fields.get(name).copied().unwrap_or(0);
                diff.insert(name.clone(), Value::from(after - before));
            }
            queue
                .push(ValueEnvelope::typed(now_nanos(), path.clone(), TypedValue::Json(Value::Object(diff))))
                .await?;
        }
        Ok(())
    }

    fn active_interval(&self) -> Option<Duration> {
        self.interval.filter(|i| !i.is_zero())
    }

    async fn emit_cycle(&self, queue: &Queue, entities: &[(Path, DbTriple)]) -> Result<(), ProducerError> {
        let first = self.sample(entities).await;
        match self.active_interval() {
            Some(interval) => {
                tokio::time::sleep(interval).await;
                let second = self.sample(entities).await;
                self.emit_diff(queue, &first, &second).await?;
            }
            None => self.emit_absolute(queue, &first).await?,
        }
        queue.push(ValueEnvelope::sync(now_nanos())).await?;
        Ok(())
    }
}

#[async_trait]
impl Producer for CounterProducer {
    async fn stream_run(
        &self,
        queue: Queue,
        stop: CancellationToken,
        _group: TaskGroup,
        sub: SubscriptionList,
    ) -> Result<(), ProducerError> {
        let entities = self.resolve_entities(&sub).await?;
        let mut last = self.sample(&entities).await;
        self.emit_absolute(&queue, &last).await?;
        queue.push(ValueEnvelope::sync(now_nanos())).await?;

        let interval = match self.active_interval() {
            Some(i) => i,
            None => return Ok(()),
        };

        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }
            let current = self.sample(&entities).await;
            self.emit_diff(&queue, &last, &current).await?;
            last = current;
        }
    }

    async fn poll_run(
        &self,
        queue: Queue,
        mut poll: PollSignal,
        _group: TaskGroup,
        sub: SubscriptionList,
    ) -> Result<(), ProducerError> {
        let entities = self.resolve_entities(&sub).await?;
        while poll.recv().await.is_some() {
            self.emit_cycle(&queue, &entities).await?;
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
        let entities = self.resolve_entities(&sub).await?;
        self.emit_cycle(&queue, &entities).await?;
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnmid_store::MemoryStoreClient;
    use gnmid_types::{Mode, PathElem, Prefix, Subscription};

    fn sub_list(paths: Vec<Vec<&str>>) -> SubscriptionList {
        SubscriptionList {
            prefix: Prefix::default(),
            subscription: paths
                .into_iter()
                .map(|names| Subscription {
                    path: Path::new(names.into_iter().map(PathElem::new).collect()),
                })
                .collect(),
            mode: Mode::Once,
            sample_interval_seconds: None,
        }
    }

    #[tokio::test]
    async fn no_interval_emits_absolute_values() {
        let store = Arc::new(MemoryStoreClient::new());
        store.set_field("COUNTERS:oid:0x1", "pkts", "100");
        let producer = CounterProducer::new(store, StoreKind::Counters, None, Arc::new(PortNameRemap::new()));

        let queue = Queue::new(8);
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tx.send(()).await.unwrap();
        drop(tx);
        let sub = sub_list(vec![vec!["COUNTERS", "oid:0x1"]]);

        producer.once_run(queue.clone(), rx, TaskGroup::new(), sub).await.unwrap();

        let envelope = queue.pop().await.unwrap();
        match envelope.payload {
            gnmid_types::Payload::Typed(TypedValue::Json(Value::Object(obj))) => {
                assert_eq!(obj.get("pkts"), Some(&Value::from(100)));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(queue.pop().await.unwrap().is_sync());
    }

    #[tokio::test]
    async fn diff_treats_missing_field_as_zero() {
        let store = Arc::new(MemoryStoreClient::new());
        store.set_field("COUNTERS:oid:0x1", "pkts", "10");
        let producer = CounterProducer::new(store, StoreKind::Counters, None, Arc::new(PortNameRemap::new()));

        let entities = vec![(
            Path::new(vec![PathElem::new("COUNTERS"), PathElem::new("oid:0x1")]),
            DbTriple {
                store: StoreKind::Counters,
                table: "COUNTERS".into(),
                key: Some("oid:0x1".into()),
                field: None,
            },
        )];

        let first = vec![(
            entities[0].0.clone(),
            BTreeMap::from([("pkts".to_string(), 10i64)]),
        )];
        let second = vec![(
            entities[0].0.clone(),
            BTreeMap::from([("pkts".to_string(), 25i64), ("errors".to_string(), 3i64)]),
        )];

        let queue = Queue::new(8);
        producer.emit_diff(&queue, &first, &second).await.unwrap();
        let envelope = queue.pop().await.unwrap();
        match envelope.payload {
            gnmid_types::Payload::Typed(TypedValue::Json(Value::Object(obj))) => {
                assert_eq!(obj.get("pkts"), Some(&Value::from(15)));
                assert_eq!(obj.get("errors"), Some(&Value::from(3)));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn entity_missing_from_one_sample_is_omitted() {
        let store = Arc::new(MemoryStoreClient::new());
        let producer = CounterProducer::new(store, StoreKind::Counters, None, Arc::new(PortNameRemap::new()));

        let path_a = Path::new(vec![PathElem::new("COUNTERS"), PathElem::new("a")]);
        let path_b = Path::new(vec![PathElem::new("COUNTERS"), PathElem::new("b")]);
        let first = vec![
            (path_a.clone(), BTreeMap::from([("pkts".to_string(), 1i64)])),
            (path_b.clone(), BTreeMap::from([("pkts".to_string(), 2i64)])),
        ];
        let second = vec![(path_a.clone(), BTreeMap::from([("pkts".to_string(), 5i64)]))];

        let queue = Queue::new(8);
        producer.emit_diff(&queue, &first, &second).await.unwrap();
        assert_eq!(queue.len(), 1);
        let envelope = queue.pop().await.unwrap();
        assert_eq!(envelope.path, Some(path_a));
    }
}
