//! Environment parsing and validation for service settings.

use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::{ConfigError, ConfigResult};
use crate::model::Settings;

/// Prefix shared by every recognised environment variable.
pub const ENV_PREFIX: &str = "OXCART_";

/// Load settings from the process environment.
///
/// # Errors
///
/// Returns an error if any `OXCART_*` variable holds a value that fails
/// parsing or validation.
pub fn load_from_env() -> ConfigResult<Settings> {
    load_with(|name| std::env::var(name).ok())
}

/// Load settings using the provided variable lookup, applying defaults for
/// anything the lookup does not supply.
///
/// # Errors
///
/// Returns an error if a supplied value fails parsing or validation.
pub fn load_with<F>(lookup: F) -> ConfigResult<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = Settings::default();

    if let Some(value) = lookup("OXCART_BIND_ADDR") {
        settings.bind_addr = value
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::invalid("bind_addr", &value, "not_an_ip_address"))?;
    }
    if let Some(value) = lookup("OXCART_HTTP_PORT") {
        settings.http_port = value
            .parse::<u16>()
            .map_err(|_| ConfigError::invalid("http_port", &value, "not_a_port"))?;
    }
    if let Some(value) = lookup("OXCART_STATE_DIR") {
        settings.state_dir = parse_path("state_dir", &value)?;
    }
    if let Some(value) = lookup("OXCART_TARGET_ROOT") {
        settings.target_root = parse_path("target_root", &value)?;
    }
    if let Some(value) = lookup("OXCART_MAX_PARALLEL_TRANSFERS") {
        settings.max_parallel_transfers = value
            .parse::<usize>()
            .map_err(|_| ConfigError::invalid("max_parallel_transfers", &value, "not_a_number"))?;
    }
    if let Some(value) = lookup("OXCART_LOG_LEVEL") {
        settings.log_level = value;
    }
    if let Some(value) = lookup("OXCART_LOG_FORMAT") {
        settings.log_format = Some(value);
    }

    validate(&settings)?;
    Ok(settings)
}

fn parse_path(field: &'static str, value: &str) -> ConfigResult<PathBuf> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, value, "empty_path"));
    }
    Ok(PathBuf::from(value))
}

fn validate(settings: &Settings) -> ConfigResult<()> {
    if settings.http_port == 0 {
        return Err(ConfigError::invalid(
            "http_port",
            settings.http_port.to_string(),
            "zero",
        ));
    }
    if settings.max_parallel_transfers == 0 {
        return Err(ConfigError::invalid(
            "max_parallel_transfers",
            settings.max_parallel_transfers.to_string(),
            "zero",
        ));
    }
    if settings.log_level.trim().is_empty() {
        return Err(ConfigError::invalid(
            "log_level",
            settings.log_level.clone(),
            "empty",
        ));
    }
    Ok(())
}
