//! Runtime configuration from environment variables, with optional `.env`
//! file support.

use log::warn;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 120;
/// Lower bound on the poll cadence; the vendor throttles accounts that poll
/// more aggressively than the mobile app does.
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_TOKEN_STORE_PATH: &str = "tokens.json";
pub const DEFAULT_POLL_BACKOFF_BASE_SECS: u64 = 30;
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    /// Mobile-app version string to present. `None` means look the published
    /// version up at startup.
    pub app_version: Option<String>,
    pub poll_interval: Duration,
    pub token_store_path: PathBuf,
    pub poll_backoff_base: Duration,
    pub max_poll_failures: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let username = require_env("COMFORT_CLOUD_USERNAME")?;
        let password = require_env("COMFORT_CLOUD_PASSWORD")?;

        let app_version = match std::env::var("COMFORT_CLOUD_APP_VERSION") {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
            _ => None,
        };

        let mut poll_interval_secs = std::env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            warn!(
                "POLL_INTERVAL_SECS={} is below the minimum, using {}s",
                poll_interval_secs, MIN_POLL_INTERVAL_SECS
            );
            poll_interval_secs = MIN_POLL_INTERVAL_SECS;
        }

        let token_store_path = std::env::var("TOKEN_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOKEN_STORE_PATH));

        let poll_backoff_base_secs = std::env::var("POLL_BACKOFF_BASE_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_BACKOFF_BASE_SECS);

        let max_poll_failures = std::env::var("MAX_POLL_FAILURES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_POLL_FAILURES);

        Ok(Config {
            username,
            password,
            app_version,
            poll_interval: Duration::from_secs(poll_interval_secs),
            token_store_path,
            poll_backoff_base: Duration::from_secs(poll_backoff_base_secs),
            max_poll_failures,
        })
    }
}

fn require_env(name: &str) -> Result<String, String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(format!("Missing required environment variable {}", name)),
    }
}

/// Load `KEY=value` assignments from an env file into the process
/// environment. Values already present in the environment win.
pub fn load_env_file(path: &Path) -> Result<(), String> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in contents.lines().enumerate() {
        match parse_env_assignment(line) {
            Ok(Some((key, value))) => {
                if std::env::var_os(&key).is_none() {
                    // Mutating the process environment is unsafe on some
                    // targets; this runs single-threaded at startup.
                    unsafe {
                        std::env::set_var(key, value);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => return Err(format!("{}:{}: {}", path.display(), index + 1, e)),
        }
    }
    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let without_export = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);

    let Some((key, raw_value)) = without_export.split_once('=') else {
        return Err("missing '=' in assignment".to_string());
    };
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(|c| c.is_whitespace()) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let raw_value = raw_value.trim();
    let value = if (raw_value.starts_with('"') && raw_value.ends_with('"') && raw_value.len() >= 2)
        || (raw_value.starts_with('\'') && raw_value.ends_with('\'') && raw_value.len() >= 2)
    {
        raw_value[1..raw_value.len() - 1].to_string()
    } else {
        // unquoted values end at the first comment marker
        raw_value.split('#').next().unwrap_or_default().trim_end().to_string()
    };
    Ok(Some((key.to_string(), value)))
}
