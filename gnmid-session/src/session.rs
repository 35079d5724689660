use crate::error::EngineError;
use crate::select::{self, StoreRegistry};
use gnmid_admission::AdmissionController;
use gnmid_producer::{Producer, ProducerError, TaskGroup};
use gnmid_proto::pb;
use gnmid_queue::{Queue, QueueError};
use gnmid_types::{Mode, Path, Payload, Prefix, Subscription, SubscriptionList};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::Instrument;

const POLL_CHANNEL_CAPACITY: usize = 8;

type Inbound = dyn Stream<Item = Result<pb::SubscribeRequest, Status>> + Unpin + Send + 'static;
type Outbound = mpsc::Sender<Result<pb::SubscribeResponse, Status>>;

/// Per-connection counters (§3, §4.7). Shared via `Arc` with whichever tasks
/// the session spawns, since each one outlives the borrow of `Session`
/// itself.
#[derive(Default)]
pub struct SessionCounters {
    pub send_msg: AtomicU64,
    pub recv_msg: AtomicU64,
    pub errors: AtomicU64,
}

/// Owns one client's subscription lifecycle end to end (§4.7): parses the
/// first message, resolves paths, selects and admits a producer, then
/// multiplexes the producer's queue through to the transport until a
/// terminal signal fires.
pub struct Session {
    peer: String,
    admission: AdmissionController,
    stores: StoreRegistry,
    queue_capacity: usize,
    counters: Arc<SessionCounters>,
}

impl Session {
    pub fn new(peer: impl Into<String>, admission: AdmissionController, stores: StoreRegistry, queue_capacity: usize) -> Self {
        Self {
            peer: peer.into(),
            admission,
            stores,
            queue_capacity,
            counters: Arc::new(SessionCounters::default()),
        }
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Drives the session to completion: reads the stream, builds a
    /// producer, and multiplexes it to `outbound` until a terminal signal.
    /// `shutdown` lets the caller (the binary's graceful-shutdown ceremony)
    /// request early termination; a child token derived from it is what the
    /// producer and its fan-out tasks observe as `stop` (§5: "Close()
    /// disposes the queue and closes the active mode channel").
    ///
    /// Entered for the lifetime of the call (§4.7): `peer` is known up
    /// front, `mode` and `target` are recorded onto the span once resolved.
    pub async fn run(&self, inbound: Box<Inbound>, outbound: Outbound, shutdown: CancellationToken) -> Result<(), EngineError> {
        let span = tracing::info_span!("session", peer = %self.peer, mode = tracing::field::Empty, target = tracing::field::Empty);
        self.run_traced(inbound, outbound, shutdown).instrument(span).await
    }

    async fn run_traced(
        &self,
        mut inbound: Box<Inbound>,
        outbound: Outbound,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        let first = match inbound.next().await {
            None => return Err(EngineError::EofBeforeInit),
            Some(Err(e)) => return Err(EngineError::Transport(e.to_string())),
            Some(Ok(req)) => req,
        };
        let list = gnmid_proto::first_subscription_list(req_or(first)).map_err(|_| EngineError::FirstMessageNotSubscriptionList)?;
        let mode = list.mode;
        tracing::Span::current().record("mode", tracing::field::debug(mode));

        let resolved = gnmid_resolver::resolve(&list)?;
        tracing::Span::current().record("target", tracing::field::display(&resolved.target));
        let producer = select::select_producer(&resolved.origin, &resolved.target, mode, list.sample_interval_seconds, &self.stores)
            .await?;

        let query_signature = format!(
            "{}|{}",
            resolved.target,
            resolved.paths.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
        );
        let (admission_key, admitted) = self.admission.add(&self.peer, &query_signature);
        admitted?;

        let sub_list = SubscriptionList {
            prefix: Prefix {
                path: Path::default(),
                origin: resolved.origin,
                target: resolved.target,
            },
            subscription: resolved.paths.into_iter().map(|path| Subscription { path }).collect(),
            mode,
            sample_interval_seconds: list.sample_interval_seconds,
        };

        let result = self.run_admitted(mode, sub_list, producer, inbound, outbound, shutdown).await;
        self.admission.remove(&admission_key);
        result
    }

    async fn run_admitted(
        &self,
        mode: Mode,
        sub_list: SubscriptionList,
        producer: Arc<dyn Producer>,
        inbound: Box<Inbound>,
        outbound: Outbound,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        let queue = Queue::new(self.queue_capacity);
        let stop = shutdown.child_token();
        let group = TaskGroup::new();
        let counters = self.counters.clone();

        let (producer_handle, receiver_handle) = match mode {
            Mode::Stream => {
                let handle = tokio::spawn({
                    let producer = producer.clone();
                    let queue = queue.clone();
                    let stop = stop.clone();
                    let group = group.clone();
                    let sub_list = sub_list.clone();
                    async move { producer.stream_run(queue, stop, group, sub_list).await }
                });
                let receiver = spawn_passive_receiver(mode, inbound, stop.clone(), counters.clone());
                (handle, receiver)
            }
            Mode::Poll => {
                let (poll_tx, poll_rx) = mpsc::channel(POLL_CHANNEL_CAPACITY);
                let handle = tokio::spawn({
                    let producer = producer.clone();
                    let queue = queue.clone();
                    let group = group.clone();
                    let sub_list = sub_list.clone();
                    async move { producer.poll_run(queue, poll_rx, group, sub_list).await }
                });
                let receiver = spawn_poll_receiver(inbound, poll_tx, stop.clone(), queue.clone(), counters.clone());
                (handle, receiver)
            }
            Mode::Once => {
                let (once_tx, once_rx) = mpsc::channel(1);
                let _ = once_tx.try_send(());
                drop(once_tx);
                let handle = tokio::spawn({
                    let producer = producer.clone();
                    let queue = queue.clone();
                    let group = group.clone();
                    let sub_list = sub_list.clone();
                    async move { producer.once_run(queue, once_rx, group, sub_list).await }
                });
                let receiver = spawn_passive_receiver(mode, inbound, stop.clone(), counters.clone());
                (handle, receiver)
            }
        };

        let sender_handle = tokio::spawn(sender_loop(queue.clone(), outbound, producer.clone(), counters.clone()));

        let (sender_result, producer_result) = tokio::join!(sender_handle, producer_wrapper(producer_handle, mode, queue.clone(), stop.clone()));

        // The receiver may still be blocked on `inbound.next()`/`stop` (STREAM's
        // passive receiver only exits on cancellation, not on the sender
        // giving up), so dispose/cancel before joining it, not after.
        queue.dispose();
        stop.cancel();
        let _ = receiver_handle.await;
        group.join_all().await;

        // §3 Lifecycle: "Producer created after resolver + admission
        // succeed; closed before Run returns." Every exit path below goes
        // through here first.
        producer.close().await;

        if let Some(err) = sender_result.unwrap_or(None) {
            return Err(err);
        }
        if let Err(err) = producer_result {
            return Err(EngineError::Producer(err));
        }
        Ok(())
    }
}

/// Helper so `first_subscription_list` (which takes the owned request by
/// value) can be called from inside the `Option`/`match` above without
/// fighting move semantics in the calling expression.
fn req_or(req: pb::SubscribeRequest) -> pb::SubscribeRequest {
    req
}

/// POLL's receiver: forwards each `Poll` trigger as a token, rejects any
/// other request kind, and observes `stop`/EOF like every other mode.
fn spawn_poll_receiver(
    mut inbound: Box<Inbound>,
    poll_tx: mpsc::Sender<()>,
    stop: CancellationToken,
    queue: Queue,
    counters: Arc<SessionCounters>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                item = inbound.next() => match item {
                    None => {
                        stop.cancel();
                        queue.dispose();
                        break;
                    }
                    Some(Err(_)) => {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                        stop.cancel();
                        queue.dispose();
                        break;
                    }
                    Some(Ok(req)) => {
                        counters.recv_msg.fetch_add(1, Ordering::Relaxed);
                        if gnmid_proto::is_poll_trigger(&req) {
                            if poll_tx.send(()).await.is_err() {
                                break;
                            }
                        } else {
                            counters.errors.fetch_add(1, Ordering::Relaxed);
                            stop.cancel();
                            queue.dispose();
                            break;
                        }
                    }
                },
            }
        }
        drop(poll_tx);
    })
}

/// STREAM's and ONCE's receiver: reads for side effects only. EOF in
/// STREAM mode does not terminate the session (§4.7, §9 Open Questions);
/// in ONCE mode (and on any non-EOF error, in both modes) it does.
fn spawn_passive_receiver(
    mode: Mode,
    mut inbound: Box<Inbound>,
    stop: CancellationToken,
    counters: Arc<SessionCounters>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                item = inbound.next() => match item {
                    None if mode == Mode::Stream => {
                        stop.cancelled().await;
                        return;
                    }
                    None => {
                        stop.cancel();
                        return;
                    }
                    Some(Err(_)) => {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                        stop.cancel();
                        return;
                    }
                    Some(Ok(_)) => {
                        counters.recv_msg.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                },
            }
        }
    })
}

async fn sender_loop(queue: Queue, outbound: Outbound, producer: Arc<dyn Producer>, counters: Arc<SessionCounters>) -> Option<EngineError> {
    loop {
        match queue.pop().await {
            Ok(env) => {
                if env.is_fatal() {
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                    producer.failed_send().await;
                    let reason = match env.payload {
                        Payload::Fatal(r) => r,
                        _ => unreachable!("is_fatal() guards this match"),
                    };
                    return Some(EngineError::Transport(reason));
                }
                let timestamp = env.timestamp;
                match gnmid_proto::envelope_to_response(&env) {
                    Some(resp) => {
                        if outbound.send(Ok(resp)).await.is_err() {
                            counters.errors.fetch_add(1, Ordering::Relaxed);
                            producer.failed_send().await;
                            return Some(EngineError::Transport("client disconnected".into()));
                        }
                        counters.send_msg.fetch_add(1, Ordering::Relaxed);
                        producer.sent_one(timestamp).await;
                    }
                    None => unreachable!("fatal envelopes are filtered above"),
                }
            }
            Err(QueueError::Disposed) => return None,
        }
    }
}

/// Waits for the top-level producer call to finish, then applies the
/// closing rule recorded in `DESIGN.md`: ONCE always closes the session on
/// completion (graceful or not); STREAM and POLL only auto-close on a
/// producer-reported error (equivalent to a failed "construction"), since a
/// successful STREAM/POLL run call may merely mean the producer finished
/// kicking off its background fan-out (see `gnmid-producers::DbProducer`).
async fn producer_wrapper(handle: tokio::task::JoinHandle<Result<(), ProducerError>>, mode: Mode, queue: Queue, stop: CancellationToken) -> Result<(), ProducerError> {
    let result = handle.await.unwrap_or(Ok(()));
    if result.is_err() || mode != Mode::Stream {
        queue.dispose();
        stop.cancel();
    }
    result
}
