//! Minimal runtime configuration helpers.
//!
//! Everything comes from the environment (optionally seeded from a `.env`
//! file by `main`). The house id is deliberately optional: when unset it is
//! discovered from the controller at setup, so no house id is ever
//! hard-coded.

use crate::models::controme::HouseId;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    /// Controme mini-server address, e.g. `http://192.168.1.10`.
    pub base_url: String,
    pub user: String,
    pub password: String,
    /// Fixed house id; `None` means discover at setup.
    pub house_id: Option<HouseId>,
    /// Poll cadence of the update coordinator.
    pub poll_interval: Duration,
}

fn require(key: &str) -> Result<String, String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("Missing required environment variable {}", key)),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let base_url = require("CONTROME_BASE_URL")?;
        let user = require("CONTROME_USER")?;
        let password = require("CONTROME_PASSWORD")?;

        let house_id = match std::env::var("CONTROME_HOUSE_ID") {
            Ok(s) if !s.trim().is_empty() => Some(HouseId(
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| "CONTROME_HOUSE_ID must be an integer".to_string())?,
            )),
            _ => None,
        };

        let poll_secs = std::env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        Ok(Config {
            base_url,
            user,
            password,
            house_id,
            poll_interval: Duration::from_secs(poll_secs),
        })
    }
}
