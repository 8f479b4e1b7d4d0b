// src/logging.rs

use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global subscriber. `RUST_LOG` overrides the default level,
/// `verbose` raises this crate to debug.
pub fn init_tracing(verbose: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let fallback = if verbose {
        format!("{},iptax_workday=debug", DEFAULT_LOG_FILTER)
    } else {
        DEFAULT_LOG_FILTER.to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
