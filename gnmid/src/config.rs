//! Configuration inputs (§6): admission threshold, per-store connection
//! descriptors, and server TLS material that is accepted but never
//! interpreted by the core (§1 Non-goals). CLI flags via `clap`, generalizing
//! `node`'s settings-layering idiom to a single flat struct, overlaid with an
//! optional TOML file read through `serde` (§9 configuration inputs are not
//! distributed/tree-shaped here, so one flat struct is enough).

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// One entry of `Configuration inputs: Per-store connection descriptors
/// (address, namespace, db-id)` (§6). `namespace` names a `StoreKind` by its
/// `StoreKind::by_target` key (`config`, `state`, `counters`).
#[derive(Debug, Clone, Deserialize)]
pub struct StoreDescriptor {
    pub namespace: String,
    pub address: String,
    pub db: i64,
}

/// TOML overlay read via `--config`; every field is optional so the file may
/// supply only the parts the CLI flags didn't.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    listen: Option<SocketAddr>,
    admission_threshold: Option<usize>,
    queue_capacity: Option<usize>,
    liveness_key: Option<String>,
    #[serde(default)]
    store: Vec<StoreDescriptor>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(name = "gnmid", about = "Model-driven telemetry subscription server")]
pub struct Opts {
    /// Address to bind the gRPC transport to.
    #[arg(long, env = "GNMID_LISTEN", default_value = "0.0.0.0:50051")]
    listen: SocketAddr,

    /// Maximum number of concurrently admitted sessions (§4.6).
    #[arg(long, env = "GNMID_ADMISSION_THRESHOLD", default_value_t = 256)]
    admission_threshold: usize,

    /// Per-session queue capacity (§5).
    #[arg(long, env = "GNMID_QUEUE_CAPACITY", default_value_t = 1024)]
    queue_capacity: usize,

    /// Well-known key the persisted-liveness identifier is written to and
    /// removed from (§6, §9).
    #[arg(long, env = "GNMID_LIVENESS_KEY", default_value = "GNMID_LIVENESS")]
    liveness_key: String,

    /// Namespace of the store the liveness key is written to; must name one
    /// of the connected `--store` descriptors.
    #[arg(long, env = "GNMID_LIVENESS_STORE", default_value = "state")]
    liveness_store: String,

    /// Repeatable store connection descriptor: `namespace=address:db`, e.g.
    /// `state=127.0.0.1:6379:6`. At least one is required.
    #[arg(long = "store", value_name = "NAMESPACE=ADDRESS:DB")]
    stores: Vec<String>,

    /// Optional TOML file overlaying/filling in the flags above, mirroring
    /// `node`'s settings layering.
    #[arg(long, env = "GNMID_CONFIG")]
    config: Option<PathBuf>,

    /// Server TLS certificate. Accepted but not interpreted by the core
    /// (§1 Non-goals: no AuthN/TLS termination logic).
    #[arg(long, env = "GNMID_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// Server TLS private key. Accepted but not interpreted by the core.
    #[arg(long, env = "GNMID_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Emit logs as JSON objects (one per line) instead of human-readable text.
    #[arg(long, env = "GNMID_LOG_JSON")]
    log_json: bool,
}

/// The fully-resolved configuration the binary runs with, after CLI flags and
/// the optional TOML overlay are merged (CLI flags win when both set a value
/// that isn't a plain default).
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub admission_threshold: usize,
    pub queue_capacity: usize,
    pub liveness_key: String,
    pub liveness_store: String,
    pub stores: Vec<StoreDescriptor>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub log_json: bool,
}

impl Config {
    /// Parses CLI flags, reads the optional `--config` TOML overlay, and
    /// merges the two (§6: "Configuration inputs (passed once at startup)").
    pub fn load() -> anyhow::Result<Self> {
        let opts = Opts::parse();
        let file = match &opts.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
                toml::from_str::<FileConfig>(&text).map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let mut stores = parse_store_flags(&opts.stores)?;
        stores.extend(file.store);
        if stores.is_empty() {
            anyhow::bail!("at least one --store NAMESPACE=ADDRESS:DB descriptor (or config file [[store]] entry) is required");
        }

        Ok(Config {
            listen: file.listen.unwrap_or(opts.listen),
            admission_threshold: file.admission_threshold.unwrap_or(opts.admission_threshold),
            queue_capacity: file.queue_capacity.unwrap_or(opts.queue_capacity),
            liveness_key: file.liveness_key.unwrap_or(opts.liveness_key),
            liveness_store: opts.liveness_store,
            stores,
            tls_cert: opts.tls_cert.or(file.tls_cert),
            tls_key: opts.tls_key.or(file.tls_key),
            log_json: opts.log_json,
        })
    }
}

fn parse_store_flags(flags: &[String]) -> anyhow::Result<Vec<StoreDescriptor>> {
    flags
        .iter()
        .map(|flag| {
            let (namespace, rest) = flag
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("store descriptor `{flag}` is missing `=` (expected NAMESPACE=ADDRESS:DB)"))?;
            let (address, db) = rest
                .rsplit_once(':')
                .ok_or_else(|| anyhow::anyhow!("store descriptor `{flag}` is missing `:DB` suffix"))?;
            let db: i64 = db
                .parse()
                .map_err(|_| anyhow::anyhow!("store descriptor `{flag}` has a non-numeric db id `{db}`"))?;
            Ok(StoreDescriptor {
                namespace: namespace.to_string(),
                address: address.to_string(),
                db,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_store_descriptor() {
        let stores = parse_store_flags(&["state=127.0.0.1:6379:6".to_string()]).unwrap();
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].namespace, "state");
        assert_eq!(stores[0].address, "127.0.0.1:6379");
        assert_eq!(stores[0].db, 6);
    }

    #[test]
    fn rejects_a_descriptor_with_no_equals() {
        assert!(parse_store_flags(&["state-127.0.0.1:6379:6".to_string()]).is_err());
    }

    #[test]
    fn rejects_a_non_numeric_db_id() {
        assert!(parse_store_flags(&["state=127.0.0.1:6379:six".to_string()]).is_err());
    }
}
