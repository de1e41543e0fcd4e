// crates/observability/src/init.rs
use anyhow::Context as _;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::hub::LogHub;

/// How the global subscriber formats and filters output.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info,tower_http=warn`.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Install the global subscriber: env filter, console output and the
/// [`LogHub`] capture layer. Fails if a subscriber is already installed.
pub fn init_tracing(config: &LogConfig, hub: &LogHub) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .with_context(|| format!("invalid log filter {:?}", config.filter))?;

    let console = if config.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().compact().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(hub.layer())
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}
