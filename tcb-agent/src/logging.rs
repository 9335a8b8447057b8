use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to enable JSON formatted logs
    pub json_format: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable colored output (only for non-JSON format)
    pub enable_colors: bool,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();
        module_levels.insert("tcb_agent".to_string(), "info".to_string());
        module_levels.insert("tcb_core".to_string(), "info".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            include_file_info: false,
            enable_colors: true,
            module_levels,
        }
    }
}

impl LoggingConfig {
    /// Default configuration with every crate of ours at `level`
    pub fn with_level(level: &str) -> anyhow::Result<Self> {
        if !levels::is_valid_level(level) {
            anyhow::bail!(
                "Invalid log level '{}', expected one of {:?}",
                level,
                levels::valid_levels()
            );
        }
        let mut config = Self {
            level: level.to_lowercase(),
            ..Self::default()
        };
        for module_level in config.module_levels.values_mut() {
            *module_level = level.to_lowercase();
        }
        Ok(config)
    }

    /// Filter built from the configuration, ignoring `RUST_LOG`
    pub fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        let mut filter = EnvFilter::new(&self.level);
        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            filter = filter.add_directive(
                directive
                    .parse()
                    .with_context(|| format!("Invalid log directive: {}", directive))?,
            );
        }
        Ok(filter)
    }
}

/// Initialize logging to stderr. `RUST_LOG` wins over the configuration when set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.env_filter()?,
    };

    // Try to initialize logging, ignore if already initialized
    let result = if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(config.include_file_info)
                    .with_line_number(config.include_file_info),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(config.include_file_info)
                    .with_line_number(config.include_file_info)
                    .with_ansi(config.enable_colors),
            )
            .try_init()
    };

    match result {
        Ok(_) => tracing::debug!("Logging initialized with level: {}", config.level),
        Err(_) => tracing::debug!("Logging already initialized, skipping"),
    }

    Ok(())
}

/// Log level utilities
pub mod levels {
    /// Check if a log level string is valid
    pub fn is_valid_level(level: &str) -> bool {
        matches!(
            level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        )
    }

    /// Get all valid log levels
    pub fn valid_levels() -> Vec<&'static str> {
        vec!["trace", "debug", "info", "warn", "error"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json_format);
        assert!(!config.include_file_info);
        assert!(config.enable_colors);
        assert_eq!(config.module_levels.get("tcb_core").map(String::as_str), Some("info"));
        assert_eq!(config.module_levels.get("tcb_agent").map(String::as_str), Some("info"));
    }

    #[test]
    fn test_with_level_applies_to_modules() {
        let config = LoggingConfig::with_level("DEBUG").unwrap();
        assert_eq!(config.level, "debug");
        assert!(config.module_levels.values().all(|level| level == "debug"));
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn test_with_level_rejects_unknown_level() {
        assert!(LoggingConfig::with_level("loud").is_err());
    }

    #[test]
    fn test_log_level_validation() {
        assert!(levels::is_valid_level("info"));
        assert!(levels::is_valid_level("DEBUG"));
        assert!(levels::is_valid_level("Error"));
        assert!(!levels::is_valid_level("invalid"));
        assert!(!levels::is_valid_level(""));
    }

    #[test]
    fn test_init_logging_twice_is_ok() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
