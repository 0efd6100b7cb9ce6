//! Configuration loader
//!
//! Loads [`WaypointConfig`] from a config file and environment variables.
//!
//! ## Loading Strategy
//! 1. Probe the standard locations for a config file; use defaults if none
//! 2. Apply `WAYPOINT_*` environment variables on top (each optional)
//! 3. Validate the pipeline section
//!
//! ## Environment Variables
//! - `WAYPOINT_BASE_URL`: prefix for relative request URLs
//! - `WAYPOINT_BASE_DELAY_MS`, `WAYPOINT_MAX_DELAY_MS`: backoff schedule
//! - `WAYPOINT_JITTER_FRACTION`: positive jitter as a fraction of the delay
//! - `WAYPOINT_MAX_RETRIES`, `WAYPOINT_MAX_DEPTH`: attempt ceilings
//! - `WAYPOINT_MAX_REFRESH_ATTEMPTS`, `WAYPOINT_REFRESH_WINDOW_MS`: refresh
//!   rate limit per refresh token
//! - `WAYPOINT_CACHE_TTL_MS`, `WAYPOINT_CACHE_MAX_ENTRIES`: response cache
//! - `WAYPOINT_REQUEST_TIMEOUT_MS`: per-attempt deadline
//! - `WAYPOINT_TOKEN_URL`, `WAYPOINT_CLIENT_ID`, `WAYPOINT_CLIENT_SECRET`:
//!   token endpoint (URL and client id must be set together)
//! - `WAYPOINT_KEYCHAIN_SERVICE`, `WAYPOINT_KEYCHAIN_ACCOUNT`: credential entry
//! - `WAYPOINT_LOG_FORMAT`: `compact` or `json`
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./waypoint.toml` or `./waypoint.json` (current working directory)
//! 2. `../waypoint.toml` or `../waypoint.json` (parent directory)
//! 3. Next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use waypoint_domain::{PipelineError, Result};

use super::{AuthorityConfig, WaypointConfig};

const CONFIG_STEM: &str = "waypoint";

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns a `Configuration` error if a config file exists but cannot be
/// parsed, an environment variable holds an invalid value, or the resulting
/// pipeline config fails validation.
pub fn load() -> Result<WaypointConfig> {
    let base = match probe_config_paths() {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::debug!("No config file found; using defaults");
            WaypointConfig::default()
        }
    };
    finish(apply_overrides(base, |key| std::env::var(key).ok())?)
}

/// Load configuration from defaults plus environment variables only
///
/// # Errors
/// Returns a `Configuration` error for invalid values.
pub fn load_from_env() -> Result<WaypointConfig> {
    let config = apply_overrides(WaypointConfig::default(), |key| std::env::var(key).ok())?;
    tracing::info!("Configuration loaded from environment variables");
    finish(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns a `Configuration` error if the file is missing, unreadable, in an
/// unsupported format or invalid.
pub fn load_from_file(path: Option<PathBuf>) -> Result<WaypointConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(config_error(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            config_error("No config file found in any of the standard locations")
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| config_error(format!("Failed to read config file: {e}")))?;

    finish(parse_config(&contents, &config_path)?)
}

/// Probe the standard locations for a config file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join(".."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.into_iter()
        .flat_map(|dir| {
            ["toml", "json"].map(|extension| dir.join(format!("{CONFIG_STEM}.{extension}")))
        })
        .find(|path| path.exists())
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<WaypointConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| config_error(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| config_error(format!("Invalid JSON format: {e}"))),
        _ => Err(config_error(format!("Unsupported config format: {extension}"))),
    }
}

/// Apply `WAYPOINT_*` overrides read through `lookup`
fn apply_overrides<F>(mut config: WaypointConfig, lookup: F) -> Result<WaypointConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("WAYPOINT_BASE_URL") {
        config.base_url = Some(url);
    }

    let pipeline = &mut config.pipeline;
    if let Some(ms) = parse_var::<u64>(&lookup, "WAYPOINT_BASE_DELAY_MS")? {
        pipeline.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_var::<u64>(&lookup, "WAYPOINT_MAX_DELAY_MS")? {
        pipeline.max_delay = Duration::from_millis(ms);
    }
    if let Some(fraction) = parse_var::<f64>(&lookup, "WAYPOINT_JITTER_FRACTION")? {
        pipeline.jitter_fraction = fraction;
    }
    if let Some(retries) = parse_var::<u32>(&lookup, "WAYPOINT_MAX_RETRIES")? {
        pipeline.max_retries = retries;
    }
    if let Some(depth) = parse_var::<u32>(&lookup, "WAYPOINT_MAX_DEPTH")? {
        pipeline.max_depth = depth;
    }
    if let Some(attempts) = parse_var::<u32>(&lookup, "WAYPOINT_MAX_REFRESH_ATTEMPTS")? {
        pipeline.max_refresh_attempts = attempts;
    }
    if let Some(ms) = parse_var::<u64>(&lookup, "WAYPOINT_REFRESH_WINDOW_MS")? {
        pipeline.refresh_window = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_var::<u64>(&lookup, "WAYPOINT_CACHE_TTL_MS")? {
        pipeline.cache_ttl = Duration::from_millis(ms);
    }
    if let Some(entries) = parse_var::<usize>(&lookup, "WAYPOINT_CACHE_MAX_ENTRIES")? {
        pipeline.cache_max_entries = entries;
    }
    if let Some(ms) = parse_var::<u64>(&lookup, "WAYPOINT_REQUEST_TIMEOUT_MS")? {
        pipeline.request_timeout = Duration::from_millis(ms);
    }

    match (lookup("WAYPOINT_TOKEN_URL"), lookup("WAYPOINT_CLIENT_ID")) {
        (Some(token_url), Some(client_id)) => {
            let mut authority = AuthorityConfig::new(token_url, client_id);
            authority.client_secret = lookup("WAYPOINT_CLIENT_SECRET");
            config.authority = Some(authority);
        }
        (None, None) => {}
        _ => {
            return Err(config_error(
                "WAYPOINT_TOKEN_URL and WAYPOINT_CLIENT_ID must be set together",
            ))
        }
    }

    if let Some(service) = lookup("WAYPOINT_KEYCHAIN_SERVICE") {
        config.keychain.service = service;
    }
    if let Some(account) = lookup("WAYPOINT_KEYCHAIN_ACCOUNT") {
        config.keychain.account = account;
    }
    if let Some(format) = lookup("WAYPOINT_LOG_FORMAT") {
        config.log_format = format.parse().map_err(config_error)?;
    }

    Ok(config)
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| config_error(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}

fn finish(config: WaypointConfig) -> Result<WaypointConfig> {
    config.pipeline.validate().map_err(config_error)?;
    if let Some(authority) = &config.authority {
        url::Url::parse(&authority.token_url)
            .map_err(|e| config_error(format!("Invalid token_url: {e}")))?;
    }
    Ok(config)
}

fn config_error(message: impl Into<String>) -> PipelineError {
    PipelineError::configuration("config", message)
}
