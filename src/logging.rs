use std::env;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. `ENV` selects the output
/// format: empty, `dev` or `development` get the human console writer,
/// anything else gets JSON lines suitable for log shippers. The filter
/// comes from `RUST_LOG` and defaults to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let environment = env::var("ENV").unwrap_or_default();

    if matches!(environment.as_str(), "" | "dev" | "development") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
    }
}
