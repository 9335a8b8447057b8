//! Allow-list settings for the agent.
//!
//! Sources, highest precedence first: command-line flags, `TCB_*`
//! environment variables, the `--config` TOML file, built-in defaults.

use crate::Args;
use anyhow::Context;
use tcb_core::FilterSettings;

pub const ENV_HOST_ALLOW: &str = "TCB_HOST_ALLOW";
pub const ENV_PORT_ALLOW: &str = "TCB_PORT_ALLOW";
pub const ENV_MIME_ALLOW: &str = "TCB_MIME_ALLOW";
pub const ENV_ONLY_MATCHES: &str = "TCB_ONLY_MATCHES";

/// Load settings using the process environment
pub fn load_filter_settings(args: &Args) -> anyhow::Result<FilterSettings> {
    load_filter_settings_with(args, |key| std::env::var(key).ok())
}

/// Load settings with `env` standing in for the process environment
pub fn load_filter_settings_with<F>(args: &Args, env: F) -> anyhow::Result<FilterSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = match &args.config {
        Some(path) => FilterSettings::load(path)
            .with_context(|| format!("Loading settings from {}", path.display()))?,
        None => FilterSettings::default(),
    };

    if let Some(value) = env(ENV_HOST_ALLOW) {
        settings.host_allow = value;
    }
    if let Some(value) = env(ENV_PORT_ALLOW) {
        settings.port_allow = value;
    }
    if let Some(value) = env(ENV_MIME_ALLOW) {
        settings.mime_allow = value;
    }
    if let Some(value) = env(ENV_ONLY_MATCHES) {
        settings.only_matches = parse_flag(&value)
            .with_context(|| format!("Invalid {} value: {}", ENV_ONLY_MATCHES, value))?;
    }

    if let Some(value) = &args.host_allow {
        settings.host_allow = value.clone();
    }
    if let Some(value) = &args.port_allow {
        settings.port_allow = value.clone();
    }
    if let Some(value) = &args.mime_allow {
        settings.mime_allow = value.clone();
    }
    if let Some(value) = args.only_matches {
        settings.only_matches = value;
    }

    Ok(settings)
}

fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{}'", other),
    }
}
