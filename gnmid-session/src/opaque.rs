use async_trait::async_trait;
use gnmid_producer::{PollSignal, Producer, ProducerError, TaskGroup};
use gnmid_queue::Queue;
use gnmid_types::{SubscriptionList, ValueEnvelope};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos() as i64
}

/// Stand-in for a producer whose real implementation is an external
/// collaborator out of scope for this engine (§1: YANG/OpenConfig
/// translation, gNOI-adjacent non-DB sources, event sources). It fulfils the
/// full [`Producer`] contract — a batch of zero paths followed by a sync
/// marker — so the selection table and session plumbing of §4.9 can be
/// exercised end-to-end without pulling in the real collaborator.
pub struct OpaqueProducer {
    kind: &'static str,
}

impl OpaqueProducer {
    pub fn translation() -> Self {
        Self { kind: "translation" }
    }

    pub fn non_db() -> Self {
        Self { kind: "non-db" }
    }

    pub fn event() -> Self {
        Self { kind: "event" }
    }
}

#[async_trait]
impl Producer for OpaqueProducer {
    async fn stream_run(
        &self,
        queue: Queue,
        stop: CancellationToken,
        _group: TaskGroup,
        _sub: SubscriptionList,
    ) -> Result<(), ProducerError> {
        tracing::debug!(kind = self.kind, "opaque producer stream started");
        queue.push(ValueEnvelope::sync(now_nanos())).await?;
        stop.cancelled().await;
        Ok(())
    }

    async fn poll_run(
        &self,
        queue: Queue,
        mut poll: PollSignal,
        _group: TaskGroup,
        _sub: SubscriptionList,
    ) -> Result<(), ProducerError> {
        while poll.recv().await.is_some() {
            queue.push(ValueEnvelope::sync(now_nanos())).await?;
        }
        Ok(())
    }

    async fn once_run(
        &self,
        queue: Queue,
        mut once: PollSignal,
        _group: TaskGroup,
        _sub: SubscriptionList,
    ) -> Result<(), ProducerError> {
        if once.recv().await.is_none() {
            return Ok(());
        }
        queue.push(ValueEnvelope::sync(now_nanos())).await?;
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnmid_types::{Mode, Prefix, SubscriptionList};
    use tokio::sync::mpsc;

    fn empty_sub(mode: Mode) -> SubscriptionList {
        SubscriptionList {
            prefix: Prefix::default(),
            subscription: vec![],
            mode,
            sample_interval_seconds: None,
        }
    }

    #[tokio::test]
    async fn once_run_emits_a_single_sync_marker() {
        let producer = OpaqueProducer::event();
        let queue = Queue::new(4);
        let (tx, rx) = mpsc::channel(1);
        tx.send(()).await.unwrap();
        drop(tx);
        producer
            .once_run(queue.clone(), rx, TaskGroup::new(), empty_sub(Mode::Once))
            .await
            .unwrap();
        assert!(queue.pop().await.unwrap().is_sync());
        assert!(queue.is_empty());
    }
}
