use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies (e.g. "info").
/// A subscriber that is already installed is left in place.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
    {
        // Logging failure shouldn't stop a build
        eprintln!("[WARN] Failed to initialize tracing: {}", e);
    }
}
