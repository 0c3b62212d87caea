//! Process logging setup.
//!
//! Console output is human-readable by default and JSON when configured.
//! `RUST_LOG` always wins over the configured level. Per-job log lines are
//! kept separately by each job's progress tracker and are also emitted here
//! at `info`.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSection;

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub use_json: bool,
    pub include_target: bool,
    /// File and line of the call site.
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Build from the `[logging]` section, with `-v` forcing debug and
    /// `--log-json` forcing JSON.
    pub fn from_section(section: &LoggingSection, verbose: bool, json: bool) -> Self {
        let level = if verbose {
            Level::DEBUG
        } else {
            parse_level(&section.level)
        };
        let use_json = json || section.json;
        Self {
            level,
            use_json,
            include_target: true,
            include_location: use_json,
        }
    }
}

/// Parse a level name, falling back to `INFO`.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn env_filter(level: Level) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(format!(
        "migrator={level},tower_http={level},hyper=warn,h2=warn",
        level = level
    ))
}

/// Install the global subscriber. Only the first call has any effect, and a
/// subscriber installed by someone else (a test harness) is left alone.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = env_filter(config.level);
        let result = if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .try_init()
        };
        if let Err(e) = result {
            eprintln!("logging already initialised: {}", e);
        }
    });
}
