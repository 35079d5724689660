use crate::path::Path;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A scalar or structured value carried by a typed envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    /// A single leaf value rendered as its wire string representation.
    Scalar(String),
    /// A JSON object, used for table/key-level snapshots (§4.4).
    Json(serde_json::Value),
}

/// The kind of payload carried by a [`ValueEnvelope`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Typed(TypedValue),
    /// Denotes "initial set complete for this batch".
    SyncMarker,
    /// A terminal, in-band signal from a producer to the sender.
    Fatal(String),
}

/// Internal timestamp-ordered message flowing from a producer to the queue.
///
/// Comparable by timestamp only; two envelopes with equal timestamps compare
/// equal for ordering purposes (insertion order is then preserved by the
/// queue, see `gnmid-queue`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValueEnvelope {
    /// Monotonic nanoseconds since the epoch.
    pub timestamp: i64,
    pub payload: Payload,
    pub path: Option<Path>,
}

impl ValueEnvelope {
    pub fn typed(timestamp: i64, path: Path, value: TypedValue) -> Self {
        Self {
            timestamp,
            payload: Payload::Typed(value),
            path: Some(path),
        }
    }

    pub fn sync(timestamp: i64) -> Self {
        Self {
            timestamp,
            payload: Payload::SyncMarker,
            path: None,
        }
    }

    pub fn fatal(timestamp: i64, reason: impl Into<String>) -> Self {
        Self {
            timestamp,
            payload: Payload::Fatal(reason.into()),
            path: None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.payload, Payload::Fatal(_))
    }

    pub fn is_sync(&self) -> bool {
        matches!(self.payload, Payload::SyncMarker)
    }
}

/// Ordered, and compared for equality, by `timestamp` alone: two envelopes
/// with equal timestamps but different payloads order as equal (insertion
/// order is preserved separately by the queue's `Entry` wrapper, see
/// `gnmid-queue`). `PartialEq`/`Eq` are defined the same way so the `Ord`
/// contract holds (`a == b` iff `a.cmp(&b) == Equal`).
impl PartialEq for ValueEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for ValueEnvelope {}

impl PartialOrd for ValueEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueEnvelope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_by_timestamp_only() {
        let a = ValueEnvelope::sync(10);
        let b = ValueEnvelope::fatal(10, "boom");
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a, b);
    }
}
