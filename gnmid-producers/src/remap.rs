use gnmid_store::StoreClient;
use once_cell::sync::OnceCell;
use std::collections::HashMap;

const PORT_NAME_MAP_KEY: &str = "COUNTERS_PORT_NAME_MAP";

/// Lazily loads, and then caches for the lifetime of the process, the
/// counter port-name → OID remap table (§4.4, §9 Open Questions). The table
/// is never invalidated once populated: a port rename requires a process
/// restart, matching the reference implementation's own lifetime contract.
#[derive(Default)]
pub struct PortNameRemap {
    cache: OnceCell<HashMap<String, String>>,
}

impl PortNameRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `name` through the remap table, loading the table from
    /// `store` on first use. Falls back to `name` unchanged if the table
    /// has no entry for it (the segment may already be an OID).
    pub async fn resolve(&self, store: &dyn StoreClient, name: &str) -> String {
        if let Some(map) = self.cache.get() {
            return map.get(name).cloned().unwrap_or_else(|| name.to_string());
        }
        let map: HashMap<String, String> = store
            .hgetall(PORT_NAME_MAP_KEY)
            .await
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();
        let resolved = map.get(name).cloned().unwrap_or_else(|| name.to_string());
        // Two racing callers both load the table; the loser's `set` is
        // discarded, which is fine since both loaded the same data.
        let _ = self.cache.set(map);
        resolved
    }
}
