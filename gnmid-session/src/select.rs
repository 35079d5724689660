use crate::opaque::OpaqueProducer;
use gnmid_producer::Producer;
use gnmid_producers::{CounterProducer, DbProducer, PortNameRemap};
use gnmid_store::{StoreConnector, StoreError};
use gnmid_types::{Mode, StoreKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Non-DB, non-event opaque target keyword (§4.9).
pub const TARGET_OTHERS: &str = "OTHERS";
/// Event-source opaque target keyword (§4.9); only valid combined with
/// `Mode::Stream`.
pub const TARGET_EVENTS: &str = "EVENTS";
/// Origin keyword that routes to the (opaque) YANG/OpenConfig translation
/// client (§4.9).
pub const ORIGIN_OPENCONFIG: &str = "openconfig";

/// A named backing-store connector per §6: "per-store connection
/// descriptors". Populated once at startup; unlike a pre-opened handle,
/// each producer calls `connect` for itself when it is constructed, so
/// backing-store connections are never shared across sessions (§3, §5).
///
/// The OID↔port-name remap table (§4.4, §9 Open Questions) is the one piece
/// of state that *is* process-wide by design — lazily loaded once and never
/// invalidated — so it lives alongside the connectors, constructed once at
/// startup, rather than inside any one producer.
#[derive(Clone)]
pub struct StoreRegistry {
    connectors: HashMap<StoreKind, Arc<dyn StoreConnector>>,
    remap: Arc<PortNameRemap>,
}

impl StoreRegistry {
    pub fn new(remap: Arc<PortNameRemap>) -> Self {
        Self {
            connectors: HashMap::new(),
            remap,
        }
    }

    pub fn insert(&mut self, kind: StoreKind, connector: Arc<dyn StoreConnector>) {
        self.connectors.insert(kind, connector);
    }

    pub fn has(&self, kind: StoreKind) -> bool {
        self.connectors.contains_key(&kind)
    }

    /// Opens a connection for `kind` through its registered connector.
    /// Exposed for the binary's one special long-lived connection (the
    /// liveness key, §6/§9); producers reach this indirectly through
    /// `select_producer`, once per construction.
    pub async fn connect(&self, kind: StoreKind) -> Result<Arc<dyn gnmid_store::StoreClient>, SelectError> {
        let connector = self.connectors.get(&kind).ok_or(SelectError::Unsupported)?;
        Ok(connector.connect().await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("unsupported origin/target combination")]
    Unsupported,
    #[error("connecting to backing store: {0}")]
    Store(#[from] StoreError),
}

/// Implements the producer selection table of §4.9. Origin/target have
/// already passed through `gnmid-resolver`; `mode` is the session's
/// negotiated, immutable mode. Each call opens a fresh backing-store
/// connection for the producer it constructs (§3, §5): connections are
/// never shared across sessions, only the remap cache and the connector
/// descriptors themselves are process-wide.
///
/// Open Question resolved (see `DESIGN.md`): a non-empty, non-`openconfig`
/// origin ("native") is routed like a recognized empty-origin target, using
/// the same `StoreKind::by_target` lookup, but rendered in JSON mode; an
/// unrecognized target in that row is `Unimplemented` just like the
/// empty-origin case, since the table gives native origins no separate
/// store-selection rule of their own.
pub async fn select_producer(
    origin: &str,
    target: &str,
    mode: Mode,
    sample_interval_seconds: Option<u64>,
    stores: &StoreRegistry,
) -> Result<Arc<dyn Producer>, SelectError> {
    if origin == ORIGIN_OPENCONFIG {
        return Ok(Arc::new(OpaqueProducer::translation()));
    }

    if !origin.is_empty() {
        let kind = StoreKind::by_target(target).ok_or(SelectError::Unsupported)?;
        let store = stores.connect(kind).await?;
        return Ok(Arc::new(DbProducer::new(store, kind, stores.remap.clone()).with_json_mode(true)));
    }

    if target == TARGET_OTHERS {
        return Ok(Arc::new(OpaqueProducer::non_db()));
    }
    if target == TARGET_EVENTS {
        return if mode == Mode::Stream {
            Ok(Arc::new(OpaqueProducer::event()))
        } else {
            Err(SelectError::Unsupported)
        };
    }
    if target.is_empty() {
        return Err(SelectError::Unsupported);
    }

    let kind = StoreKind::by_target(target).ok_or(SelectError::Unsupported)?;
    let store = stores.connect(kind).await?;

    if kind == StoreKind::Counters {
        if let Some(secs) = sample_interval_seconds.filter(|s| *s > 0) {
            return Ok(Arc::new(CounterProducer::new(store, kind, Some(Duration::from_secs(secs)), stores.remap.clone())));
        }
    }
    Ok(Arc::new(DbProducer::new(store, kind, stores.remap.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnmid_store::{MemoryStoreClient, StaticStoreConnector};

    fn registry() -> StoreRegistry {
        let mut r = StoreRegistry::new(Arc::new(PortNameRemap::new()));
        r.insert(StoreKind::State, Arc::new(StaticStoreConnector::new(Arc::new(MemoryStoreClient::new()))));
        r.insert(StoreKind::Counters, Arc::new(StaticStoreConnector::new(Arc::new(MemoryStoreClient::new()))));
        r
    }

    #[tokio::test]
    async fn empty_origin_and_target_is_unimplemented() {
        let err = select_producer("", "", Mode::Once, None, &registry()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn events_target_requires_stream_mode() {
        let registry = registry();
        assert!(select_producer("", TARGET_EVENTS, Mode::Once, None, &registry).await.is_err());
        assert!(select_producer("", TARGET_EVENTS, Mode::Stream, None, &registry).await.is_ok());
    }

    #[tokio::test]
    async fn unrecognized_store_name_is_unimplemented() {
        let err = select_producer("", "NO_SUCH_STORE", Mode::Once, None, &registry()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn recognized_store_name_selects_db_producer() {
        assert!(select_producer("", "state", Mode::Once, None, &registry()).await.is_ok());
    }

    #[tokio::test]
    async fn counters_with_interval_selects_counter_producer() {
        assert!(select_producer("", "counters", Mode::Once, Some(5), &registry()).await.is_ok());
    }

    #[tokio::test]
    async fn openconfig_origin_routes_to_translation_regardless_of_target() {
        assert!(select_producer("openconfig", "anything", Mode::Stream, None, &registry()).await.is_ok());
    }

    #[tokio::test]
    async fn a_store_with_no_connector_is_unimplemented() {
        let registry = StoreRegistry::new(Arc::new(PortNameRemap::new()));
        let err = select_producer("", "state", Mode::Once, None, &registry).await;
        assert!(matches!(err, Err(SelectError::Unsupported)));
    }
}
