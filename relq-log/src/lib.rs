//! relq logging
//!
//! Installs a `tracing` subscriber configured from the environment. The
//! queue crates log through the `tracing` macros re-exported here, so a
//! binary only has to call [`init`] once at startup.
//!
//! # Usage
//!
//! ```rust
//! use relq_log::{debug, info};
//!
//! relq_log::init();
//!
//! info!(queue = "emails", "dispatcher started");
//! debug!(id = 7, "claimed item");
//! ```
//!
//! # Environment Variables
//!
//! - `RELQ_DEBUG=1` - Default the level to debug
//! - `RELQ_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `RELQ_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `RELQ_LOG_COLOR=1|0` - Enable/disable colors
//! - `RELQ_LOG_TARGET=1|0` - Include the module path of each event
//!
//! `RUST_LOG`, when set, takes precedence over `RELQ_LOG_LEVEL`.

use once_cell::sync::Lazy;
use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level (least verbose)
    Error = 4,
    /// Off (no logging)
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// The `EnvFilter` directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON, one object per line
    Json,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
    /// Whether to include the event target
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Json,
            color: false,
            target: true,
        }
    }
}

impl LogConfig {
    /// Read the configuration from `RELQ_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("RELQ_DEBUG").unwrap_or(false);

        let level = lookup("RELQ_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("RELQ_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let color = flag("RELQ_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        let target = flag("RELQ_LOG_TARGET").unwrap_or(true);

        Self {
            level,
            format,
            color,
            target,
        }
    }

    /// Set the level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable colors.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Filter used when `RUST_LOG` is absent.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }

    /// Build the formatting layer, filter included.
    pub fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let filter = self.filter();
        match self.format {
            Format::Json => Box::new(
                fmt::layer()
                    .json()
                    .with_target(self.target)
                    .with_filter(filter),
            ),
            Format::Compact => Box::new(
                fmt::layer()
                    .compact()
                    .with_ansi(self.color)
                    .with_target(self.target)
                    .with_filter(filter),
            ),
            Format::Pretty => Box::new(
                fmt::layer()
                    .pretty()
                    .with_ansi(self.color)
                    .with_target(self.target)
                    .with_filter(filter),
            ),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// The environment-derived configuration, read once.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Install the global subscriber using [`config`].
///
/// Returns `false` when a global subscriber was already installed, which
/// makes repeated calls harmless.
pub fn init() -> bool {
    init_with(config())
}

/// Install the global subscriber with an explicit configuration.
pub fn init_with(config: &LogConfig) -> bool {
    tracing_subscriber::registry()
        .with(config.layer())
        .try_init()
        .is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse("DEBUG"), Some(Level::Debug));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("pretty"), Some(Format::Pretty));
        assert_eq!(Format::parse("Compact"), Some(Format::Compact));
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::Warn.to_string(), "WARN");
        assert_eq!(Level::Trace.as_directive(), "trace");
    }

    #[test]
    fn test_config_defaults_without_env() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(!config.color);
        assert!(config.target);
    }

    #[test]
    fn test_debug_flag_lowers_default_level() {
        let config = LogConfig::from_lookup(lookup(&[("RELQ_DEBUG", "true")]));
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[
            ("RELQ_DEBUG", "1"),
            ("RELQ_LOG_LEVEL", "error"),
        ]));
        assert_eq!(config.level, Level::Error);
    }

    #[test]
    fn test_color_follows_terminal_hints() {
        let config = LogConfig::from_lookup(lookup(&[("TERM", "xterm")]));
        assert!(config.color);

        let config = LogConfig::from_lookup(lookup(&[("TERM", "xterm"), ("NO_COLOR", "1")]));
        assert!(!config.color);

        let config = LogConfig::from_lookup(lookup(&[("RELQ_LOG_COLOR", "1")]));
        assert!(config.color);
    }

    #[test]
    fn test_builder_setters() {
        let config = LogConfig::default()
            .with_level(Level::Trace)
            .with_format(Format::Compact)
            .with_color(true);
        assert_eq!(config.level, Level::Trace);
        assert_eq!(config.format, Format::Compact);
        assert!(config.color);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig::default().with_level(Level::Off);
        init_with(&config);
        assert!(!init_with(&config));

        info!(attempt = 2, "logged through the installed subscriber");
    }
}
