use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub remote_url: String,
    pub rooms: Vec<String>,
    pub sync_interval: Duration,
    /// The local user; their own messages never count as unread.
    pub user_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path: PathBuf = get("FLASH_DB_PATH")
            .unwrap_or_else(|| "flashsend.db".into())
            .into();

        let Some(remote_url) = get("FLASH_REMOTE_URL").filter(|v| !v.trim().is_empty()) else {
            bail!("FLASH_REMOTE_URL is unset; point it at the chat backend");
        };

        let rooms: Vec<String> = get("FLASH_ROOMS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|room| !room.is_empty())
            .map(String::from)
            .collect();

        let interval_secs: u64 = match get("FLASH_SYNC_INTERVAL_SECS") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("FLASH_SYNC_INTERVAL_SECS must be a whole number, got '{}'", v))?,
            None => 30,
        };
        if interval_secs == 0 {
            bail!("FLASH_SYNC_INTERVAL_SECS must be at least 1");
        }

        let user_id = get("FLASH_USER_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            db_path,
            remote_url: remote_url.trim().to_string(),
            rooms,
            sync_interval: Duration::from_secs(interval_secs),
            user_id,
        })
    }
}
