use serde::{Deserialize, Serialize};

/// The small, closed set of named key/value stores a path can be resolved
/// against (§4.4, §6). Each variant carries its own delimiter and whether it
/// holds keyless, single-blob tables (the "counters" store).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKind {
    Config,
    State,
    Counters,
}

impl StoreKind {
    pub fn delimiter(self) -> &'static str {
        match self {
            StoreKind::Config | StoreKind::State => "|",
            StoreKind::Counters => ":",
        }
    }

    /// Whether this store keeps some tables as a single blob without a
    /// per-row key (true for the counters store, see §4.4/§6).
    pub fn has_keyless_tables(self) -> bool {
        matches!(self, StoreKind::Counters)
    }

    /// The backing store's numeric db index, used to build the
    /// keyspace-notification channel pattern (§3, §6).
    pub fn db_num(self) -> u8 {
        match self {
            StoreKind::Config => 4,
            StoreKind::State => 6,
            StoreKind::Counters => 2,
        }
    }

    pub fn by_target(name: &str) -> Option<StoreKind> {
        match name {
            "CONFIG_DB" | "config" => Some(StoreKind::Config),
            "STATE_DB" | "state" => Some(StoreKind::State),
            "COUNTERS_DB" | "counters" => Some(StoreKind::Counters),
            _ => None,
        }
    }
}

/// The (table, key, field) projection of a path onto a store's addressing
/// model. `field` empty means "entire table row".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbTriple {
    pub store: StoreKind,
    pub table: String,
    pub key: Option<String>,
    pub field: Option<String>,
}

impl DbTriple {
    /// The composite key as stored in the backing hash table, e.g.
    /// `TABLE|key` or just `TABLE` for a keyless table.
    pub fn redis_key(&self) -> String {
        match &self.key {
            Some(k) => format!("{}{}{}", self.table, self.store.delimiter(), k),
            None => self.table.clone(),
        }
    }

    pub fn is_field_scoped(&self) -> bool {
        self.field.is_some()
    }
}
