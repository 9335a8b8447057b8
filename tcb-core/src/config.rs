//! Configuration types and utilities

use crate::{error::TcbError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_HOST_ALLOW: &str = r".*(api|login|auth|gateway).*|localhost|127\.0\.0\.1";
pub const DEFAULT_PORT_ALLOW: &str = "80,443,8080,8443";
pub const DEFAULT_MIME_ALLOW: &str =
    "^(application/json|application/xml|text/.*|application/octet-stream)$";

/// User-facing allow-list settings consumed by the "apply" operation.
/// These are raw texts; compilation happens in the rule store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Host allow-list regex (search semantics)
    pub host_allow: String,
    /// Comma-separated allowed ports
    pub port_allow: String,
    /// MIME allow-list regex (search semantics)
    pub mime_allow: String,
    /// Show/annotate only matching traffic. Advisory for the shell.
    pub only_matches: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            host_allow: DEFAULT_HOST_ALLOW.to_string(),
            port_allow: DEFAULT_PORT_ALLOW.to_string(),
            mime_allow: DEFAULT_MIME_ALLOW.to_string(),
            only_matches: false,
        }
    }
}

impl FilterSettings {
    /// Parse settings from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TcbError::Config(format!("Invalid settings file: {}", e)))
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TcbError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = FilterSettings::default();
        assert_eq!(settings.host_allow, r".*(api|login|auth|gateway).*|localhost|127\.0\.0\.1");
        assert_eq!(settings.port_allow, "80,443,8080,8443");
        assert!(settings.mime_allow.starts_with("^(application/json"));
        assert!(!settings.only_matches);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = FilterSettings::from_toml_str("port_allow = \"9000\"\nonly_matches = true\n").unwrap();
        assert_eq!(settings.port_allow, "9000");
        assert!(settings.only_matches);
        assert_eq!(settings.host_allow, DEFAULT_HOST_ALLOW);
        assert_eq!(settings.mime_allow, DEFAULT_MIME_ALLOW);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = FilterSettings::from_toml_str("port_allow = [").unwrap_err();
        assert!(matches!(err, TcbError::Config(_)));
    }
}
