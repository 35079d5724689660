//! The abstract contract a data source fulfils to feed a session's queue
//! (§4.3). Exactly one of `stream_run`/`poll_run`/`once_run` is invoked per
//! session, matching the subscription mode negotiated at setup.

mod error;
mod task_group;

pub use error::ProducerError;
pub use task_group::TaskGroup;

use async_trait::async_trait;
use gnmid_queue::Queue;
use gnmid_types::SubscriptionList;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One token per Poll (or Once) request the receiver forwards to the
/// producer; the channel closing signals "the client is gone or the session
/// is tearing down" the same way a closed `stop` token does for STREAM mode.
pub type PollSignal = mpsc::Receiver<()>;

#[async_trait]
pub trait Producer: Send + Sync {
    /// Pushes an initial snapshot for each resolved path, then one
    /// `syncMarker`, then continues pushing update envelopes until `stop` is
    /// cancelled. Any task this spawns must be registered on `group` so the
    /// session can wait for it to exit.
    async fn stream_run(
        &self,
        queue: Queue,
        stop: CancellationToken,
        group: TaskGroup,
        sub: SubscriptionList,
    ) -> Result<(), ProducerError>;

    /// Waits for a token on `poll`; for each token, emits a full snapshot
    /// followed by one `syncMarker`. Terminates when `poll` closes.
    async fn poll_run(
        &self,
        queue: Queue,
        poll: PollSignal,
        group: TaskGroup,
        sub: SubscriptionList,
    ) -> Result<(), ProducerError>;

    /// Exactly like `poll_run`, but emits one snapshot+sync and returns.
    async fn once_run(
        &self,
        queue: Queue,
        once: PollSignal,
        group: TaskGroup,
        sub: SubscriptionList,
    ) -> Result<(), ProducerError>;

    /// Releases backing-store resources. Must be idempotent.
    async fn close(&self);

    /// Confirmation the envelope reached the wire. No-op is a reasonable
    /// default for producers with no cursor to advance (§9 Open Questions).
    async fn sent_one(&self, _timestamp: i64) {}

    /// The sender gave up; the producer should unwind.
    async fn failed_send(&self) {}
}
