use crate::path::{Path, Prefix};
use serde::{Deserialize, Serialize};

/// Delivery cadence requested by the client. Immutable for the session's
/// lifetime once the first message has been parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Stream,
    Poll,
    Once,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub path: Path,
}

/// A prefix plus an ordered sequence of subscriptions and a mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionList {
    pub prefix: Prefix,
    pub subscription: Vec<Subscription>,
    pub mode: Mode,
    /// Non-zero enables the counter/sampler producer's diff behavior
    /// (§4.5): the producer samples once, waits this many seconds, samples
    /// again, and emits the per-field difference. `None`/zero means
    /// absolute-value sampling (or, for a recognized DB target, is not a
    /// counter-producer request at all — see the producer selection table,
    /// §4.9).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_interval_seconds: Option<u64>,
}
