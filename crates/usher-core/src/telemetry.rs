use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for structured logging.
///
/// The filter comes from `RUST_LOG` when set; otherwise `debug` when the
/// caller asks for verbose output, `info` when not. Debug builds log
/// human-readable lines; release builds emit JSON for log aggregation.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}
