use tracing_subscriber::EnvFilter;

// ort is chatty at info while building sessions
const DEFAULT_FILTER: &str = "info,ort=warn";

pub fn init() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter)).with_ansi(false).init();
}

/// Like `init`, but tolerates an already-installed subscriber. For tests.
pub fn try_init() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_ansi(false)
        .with_test_writer()
        .try_init();
}
