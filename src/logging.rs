use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
  fmt,
  layer::{Layer, SubscriberExt},
  util::SubscriberInitExt,
  EnvFilter,
};

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "escruta.log";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. With a log directory, output
/// goes to a daily-rolling file and the returned guard must be kept alive
/// until exit so buffered lines are flushed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = build_filter(config, std::env::var("RUST_LOG").ok().as_deref())?;

  let (fmt_layer, guard) = match &config.directory {
    Some(directory) => {
      std::fs::create_dir_all(directory)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;
      let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
      (layer, Some(guard))
    }
    None => {
      let layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false)
        .boxed();
      (layer, None)
    }
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

fn build_filter(config: &LogConfig, env: Option<&str>) -> Result<EnvFilter> {
  let directive = env
    .filter(|value| !value.trim().is_empty())
    .unwrap_or(&config.level);
  EnvFilter::try_new(directive).map_err(|e| eyre!("Invalid log filter {:?}: {}", directive, e))
}
