//! Subscriber construction.

use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{Format, LogConfig};
use crate::error::{LogError, LogResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Keeps the logger alive. Dropping it does not uninstall the subscriber.
#[derive(Debug)]
#[must_use = "dropping the guard immediately is almost always a mistake"]
pub struct LoggerGuard {
    format: Format,
}

impl LoggerGuard {
    /// Format the subscriber was built with.
    pub fn format(&self) -> Format {
        self.format
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// [`LogError::Filter`] for an unparsable directive,
/// [`LogError::AlreadyInitialised`] when a subscriber is already set.
pub fn init(config: &LogConfig) -> LogResult<LoggerGuard> {
    let filter = build_filter(&config.level)?;

    tracing_subscriber::registry()
        .with(fmt_layer(config))
        .with(filter)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialised)?;

    tracing::debug!(format = ?config.format, level = %config.level, "logger initialised");
    Ok(LoggerGuard {
        format: config.format,
    })
}

fn build_filter(level: &str) -> LogResult<EnvFilter> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }
    EnvFilter::try_new(level).map_err(|e| LogError::Filter {
        directive: level.to_owned(),
        reason: e.to_string(),
    })
}

fn fmt_layer(config: &LogConfig) -> BoxedLayer {
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_writer(std::io::stderr);

    match config.format {
        Format::Pretty => base.pretty().with_ansi(config.ansi).boxed(),
        Format::Compact => base.compact().with_ansi(config.ansi).boxed(),
        Format::Json => base.json().with_ansi(false).boxed(),
    }
}
