//! Logging and tracing setup.
//!
//! The engine and resources emit `tracing` events: reads that degrade a
//! tolerant field log at `debug`, completed remote operations at `info`.
//! These helpers install a subscriber that writes them to **stderr** and
//! filters with `RUST_LOG`.
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_azurerm::init_logging;
//!
//! fn main() {
//!     // Initialize logging (reads RUST_LOG env var)
//!     init_logging();
//!     tracing::info!("Starting provider");
//! }
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Show info logs (default)
//! RUST_LOG=info ./my-provider
//!
//! # Show every degraded response field
//! RUST_LOG=hemmer_provider_azurerm::flatten=debug ./my-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub default_level: String,
    /// Include the event target (module path).
    pub with_target: bool,
    /// Colourise output.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            with_target: true,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Default settings: `info`, targets shown, colours on.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter used when `RUST_LOG` is not set, e.g. `debug` or
    /// `warn,hemmer_provider_azurerm=debug`.
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Show or hide event targets.
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Turn colours on or off.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// The filter from `RUST_LOG`, falling back to the default level.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }

    fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        tracing_subscriber::registry().with(self.filter()).with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(self.with_target)
                .with_ansi(self.ansi)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
    }
}

/// Initialize the default logging subscriber.
///
/// Writes to stderr, respects `RUST_LOG` and defaults to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_config(&LogConfig::default());
}

/// Initialize logging with custom settings.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_config(config: &LogConfig) {
    config.subscriber().init();
}

/// Try to initialize logging, returning false if already initialized.
///
/// Unlike [`init_logging`], this function does not panic if a subscriber
/// has already been set, which makes it safe to call from tests.
pub fn try_init_logging() -> bool {
    LogConfig::default().subscriber().try_init().is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so only the
    // configuration is tested here.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("hemmer_provider_azurerm=debug").is_ok());
        assert!(EnvFilter::try_new("warn,hemmer_provider_azurerm::flatten=debug").is_ok());
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new()
            .with_default_level("debug")
            .with_target(false)
            .with_ansi(false);
        assert_eq!(config.default_level, "debug");
        assert!(!config.with_target);
        assert!(!config.ansi);
        assert_eq!(LogConfig::default().default_level, "info");
    }

    #[test]
    fn test_try_init_twice() {
        try_init_logging();
        assert!(!try_init_logging());
    }
}
