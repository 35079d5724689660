use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// A wait group shared between a session and the producer(s) it owns, so
/// per-path fan-out tasks spawned deep inside a producer are tracked by the
/// same mechanism the session uses to know when it is safe to return from
/// `Run` (§5: "all of these are tracked by one wait group").
#[derive(Clone, Default)]
pub struct TaskGroup {
    inner: Arc<Mutex<JoinSet<()>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        // `try_lock` never contends in practice: the only callers are the
        // producer task itself while setting up its fan-out, never two
        // spawns racing concurrently from unrelated tasks.
        if let Ok(mut set) = self.inner.try_lock() {
            set.spawn(fut);
        } else {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.lock().await.spawn(fut);
            });
        }
    }

    /// Waits for every task spawned on this group (so far) to complete.
    pub async fn join_all(&self) {
        let mut set = self.inner.lock().await;
        while set.join_next().await.is_some() {}
    }
}
