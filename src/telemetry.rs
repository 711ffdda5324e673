use spatial_anchors_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `logging.filter`. Returns `false` if a subscriber
/// was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut invalid_filter = false;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| {
            invalid_filter = true;
            EnvFilter::new("info")
        });

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok();

    if installed && invalid_filter {
        tracing::warn!("Invalid logging.filter '{}', using 'info'", config.filter);
    }
    installed
}
