//! Structured logging setup (§1 ambient stack), following `swarm-cli`'s
//! `tracing_subscriber`/`tracing-appender` wiring: a global subscriber built
//! once at startup, reading its filter from `RUST_LOG`, with `log`-crate
//! records (from dependencies still on the `log` facade) routed through the
//! same subscriber via `tracing-log`.

use tracing_subscriber::EnvFilter;

/// Installs the process-wide `tracing` subscriber. Must be called exactly
/// once before any `tracing::info!`/`debug!`/span is recorded.
pub fn init(json: bool) {
    tracing_log::LogTracer::init().ok();
    log_panics::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
