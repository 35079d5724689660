//! Server binary (§2, §6): loads configuration, wires the backing stores,
//! admission controller, and session engine together, and serves the
//! `Gnmid` tonic service until a termination signal triggers the graceful
//! shutdown ceremony.

mod config;
mod logging;
mod service;

use config::{Config, StoreDescriptor};
use gnmid_admission::AdmissionController;
use gnmid_producers::PortNameRemap;
use gnmid_proto::pb::gnmid_server::GnmidServer;
use gnmid_session::StoreRegistry;
use gnmid_store::RedisStoreConnector;
use gnmid_types::StoreKind;
use service::GnmidService;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    logging::init(config.log_json);

    if let Err(err) = run(config).await {
        tracing::error!("{:#}", err);
        return Err(err);
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let stores = build_registry(&config.stores)?;
    let liveness_store = resolve_liveness_store(&config.liveness_store, &stores).await?;

    let admission = AdmissionController::new(config.admission_threshold);
    admission
        .publish_liveness(liveness_store.as_ref(), &config.liveness_key, &liveness_identifier())
        .await
        .map_err(|e| anyhow::anyhow!("publishing liveness key: {e}"))?;

    let shutdown = CancellationToken::new();
    let service = GnmidService::new(admission.clone(), stores, config.queue_capacity, shutdown.child_token());

    tracing::info!(listen = %config.listen, admission_threshold = config.admission_threshold, "gnmid starting");

    let server = tonic::transport::Server::builder()
        .add_service(GnmidServer::new(service))
        .serve_with_shutdown(config.listen, shutdown_signal(shutdown.clone()));

    let result = server.await;

    admission
        .clear_liveness(liveness_store.as_ref(), &config.liveness_key)
        .await
        .ok();
    tracing::info!("gnmid stopped");
    result.map_err(anyhow::Error::from)
}

/// Builds one [`RedisStoreConnector`] per configured descriptor, indexed by
/// the `StoreKind` its namespace names (§6: "Per-store connection
/// descriptors (address, namespace, db-id)"), plus the single process-wide
/// port-name remap table (§4.4, §9 Open Questions) every producer shares.
/// No backing-store connection is opened here: each producer opens its own
/// when constructed (§3, §5), so this registry only has to know *how* to
/// connect, not hold an open connection itself.
fn build_registry(descriptors: &[StoreDescriptor]) -> anyhow::Result<StoreRegistry> {
    let mut registry = StoreRegistry::new(Arc::new(PortNameRemap::new()));
    for descriptor in descriptors {
        let kind = StoreKind::by_target(&descriptor.namespace)
            .ok_or_else(|| anyhow::anyhow!("unknown store namespace `{}`", descriptor.namespace))?;
        registry.insert(kind, Arc::new(RedisStoreConnector::new(descriptor.address.clone(), descriptor.db)));
    }
    Ok(registry)
}

/// Opens the one connection the liveness key is published to and cleared
/// from at startup/shutdown (§6, §9) — a single long-lived connection held
/// by the binary itself, not a producer, so it is exempt from the
/// one-connection-per-producer rule §3/§5 impose on subscription traffic.
async fn resolve_liveness_store(namespace: &str, stores: &StoreRegistry) -> anyhow::Result<Arc<dyn gnmid_store::StoreClient>> {
    let kind = StoreKind::by_target(namespace).ok_or_else(|| anyhow::anyhow!("unknown liveness store namespace `{namespace}`"))?;
    if !stores.has(kind) {
        anyhow::bail!("liveness store namespace `{namespace}` has no matching --store descriptor");
    }
    stores
        .connect(kind)
        .await
        .map_err(|e| anyhow::anyhow!("connecting to liveness store `{namespace}`: {e}"))
}

fn liveness_identifier() -> String {
    format!("gnmid:{}", std::process::id())
}

/// Async counterpart to `node::util::shutdown_ceremony`'s OS-thread parking:
/// this server runs entirely inside a `tokio` runtime, so the termination
/// signal resolves a future instead of parking a dedicated thread, and the
/// resulting cancellation fans out through `CancellationToken` children
/// rather than a dropped `app_handle`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining sessions");
    shutdown.cancel();
}
