use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "objsyncd=info,objsync_core=info,reqwest=warn,hyper=warn";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter and
/// `OBJSYNC_LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("OBJSYNC_LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // try_init: a subscriber may already be installed by an embedding process.
    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}
