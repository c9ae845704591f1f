//! Subscriber installation.

use linechat_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Build the filter: `RUST_LOG` when set and valid, else the configured level.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_filter_str()))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(settings: &LoggingSettings) {
    let fmt_layer = match settings.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(true).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed(),
    };
    let _ = tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(fmt_layer)
        .try_init();
}
