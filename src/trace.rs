use tracing_subscriber::EnvFilter;

/// Install the global subscriber: compact fmt output with targets, filtered
/// by `RUST_LOG` or `default_filter` when unset. The sync runs are driven
/// from a CLI, so file/line noise is left off.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))
}
