//! Logging initialization using the `tracing` ecosystem.
//!
//! - Console output (colored, human-readable)
//! - File output (daily rotation via `tracing-appender`), optionally JSON
//!   lines so the audit trail of reconciliation decisions can be machine-read
//! - Level from `RUST_LOG` when set, else the configured level

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Initialize the global tracing subscriber.
///
/// Call once at program start. A CLI-provided `level_override` wins over the
/// configured level; `RUST_LOG` wins over both.
pub fn init_logging(config: &LogConfig, level_override: Option<&str>, dir_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let dir = dir_override.or(config.dir.as_deref());
    match dir {
        Some(dir) if config.json => {
            let file_appender = tracing_appender::rolling::daily(dir, &config.module_name);
            let file_layer = fmt::layer().json().with_writer(file_appender).with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();
        }
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, &config.module_name);
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(env_filter).with(console_layer).init();
        }
    }
}
