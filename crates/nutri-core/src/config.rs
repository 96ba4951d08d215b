use std::str::FromStr;

use crate::app_config::{AppConfig, Environment, DEFAULT_ALLOWED_ORIGINS};
use crate::{ConfigError, DailySchedule};

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so tests can use a plain `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let database_url = require("DATABASE_URL")?;
    let env = match lookup("NUTRI_ENV") {
        Ok(raw) => parse_environment(&raw)?,
        Err(_) => environment_from_node_env(lookup("NODE_ENV").ok().as_deref()),
    };
    let port = parse_var::<u16>("PORT", &or_default("PORT", "8080"))?;
    let platform_hosted = lookup("VERCEL").is_ok_and(|v| !v.is_empty());
    let log_level = or_default("NUTRI_LOG_LEVEL", "info");

    let db_max_connections =
        parse_var::<u32>("NUTRI_DB_MAX_CONNECTIONS", &or_default("NUTRI_DB_MAX_CONNECTIONS", "10"))?;
    let db_min_connections =
        parse_var::<u32>("NUTRI_DB_MIN_CONNECTIONS", &or_default("NUTRI_DB_MIN_CONNECTIONS", "1"))?;
    let db_acquire_timeout_secs = parse_var::<u64>(
        "NUTRI_DB_ACQUIRE_TIMEOUT_SECS",
        &or_default("NUTRI_DB_ACQUIRE_TIMEOUT_SECS", "10"),
    )?;

    let cleanup_schedule = DailySchedule::parse(&or_default("NUTRI_CLEANUP_AT", "00:00"))
        .map_err(|reason| ConfigError::InvalidEnvVar {
            var: "NUTRI_CLEANUP_AT".to_string(),
            reason,
        })?;

    Ok(AppConfig {
        database_url,
        env,
        port,
        platform_hosted,
        allowed_origins: DEFAULT_ALLOWED_ORIGINS
            .iter()
            .map(ToString::to_string)
            .collect(),
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        cleanup_schedule,
    })
}

fn parse_var<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "NUTRI_ENV".to_string(),
            reason: format!("expected development, test or production, got '{other}'"),
        }),
    }
}

/// Fallback for deployments that only set `NODE_ENV`: anything other than
/// `production` or `test` is development.
fn environment_from_node_env(value: Option<&str>) -> Environment {
    match value.map(str::trim) {
        Some("production") => Environment::Production,
        Some("test") => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
