//! HTTP client for the Controme mini-server API (read house data, write a
//! temporary setpoint).
//!
//! - Blocking client using `ureq` (no async).
//! - Read access uses HTTP Basic auth; the setpoint write endpoint takes the
//!   credentials as form fields (vendor quirk).
//! - No caching and no internal retries: retry policy lives in the
//!   coordinator's cadence, not here.

use crate::models::controme::{HouseId, RawFloor, RawHouse, RoomId};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum ContromeClientError {
    Transport(String),
    Http { status: u16, message: String },
    Auth(String),
    Json(String),
}

impl core::fmt::Display for ContromeClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ContromeClientError::Transport(s) => write!(f, "transport error: {}", s),
            ContromeClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            ContromeClientError::Auth(s) => write!(f, "auth error: {}", s),
            ContromeClientError::Json(s) => write!(f, "json error: {}", s),
        }
    }
}

impl std::error::Error for ContromeClientError {}

/// How long a temporary setpoint override should last.
///
/// `DeviceDefault` omits the duration from the request entirely so the
/// controller falls back to the runtime configured on its own control panel;
/// the integration never invents a duration of its own.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetDuration {
    DeviceDefault,
    Minutes(u32),
}

/// The call surface the coordinator and the climate entity consume.
///
/// Split out as a trait so the polling and write paths can be exercised
/// against an in-memory double.
pub trait ContromeApi: Send + Sync {
    /// One read for the whole house: all floors with their rooms.
    fn fetch_house(&self, house: HouseId) -> Result<Vec<RawFloor>, ContromeClientError>;

    /// Issue a temporary target-temperature override for one room.
    fn set_temporary_target(
        &self,
        house: HouseId,
        room: RoomId,
        target_celsius: f64,
        duration: TargetDuration,
    ) -> Result<(), ContromeClientError>;
}

pub struct ContromeClient {
    agent: ureq::Agent,
    base_url: String,
    user: String,
    password: String,
    auth_header: String,
}

/// Ensure a scheme and strip the trailing slash, matching what the vendor's
/// own examples accept as "server address".
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    with_scheme.trim_end_matches('/').to_string()
}

impl ContromeClient {
    pub fn new(base_url: &str, user: impl Into<String>, password: impl Into<String>) -> Self {
        let user = user.into();
        let password = password.into();
        let auth_header = format!("Basic {}", BASE64.encode(format!("{}:{}", user, password)));
        ContromeClient {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            base_url: normalize_base_url(base_url),
            user,
            password,
            auth_header,
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ContromeClientError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .agent
            .get(&url)
            .set("Accept", "application/json")
            .set("Authorization", &self.auth_header)
            .call();

        match resp {
            Ok(res) => {
                let body = res
                    .into_string()
                    .map_err(|e| ContromeClientError::Transport(e.to_string()))?;
                let de = &mut serde_json::Deserializer::from_str(&body);
                serde_path_to_error::deserialize(de)
                    .map_err(|e| ContromeClientError::Json(e.to_string()))
            }
            Err(ureq::Error::Status(status @ (401 | 403), res)) => {
                let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(ContromeClientError::Auth(format!("http {}: {}", status, body)))
            }
            Err(ureq::Error::Status(status, res)) => {
                let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(ContromeClientError::Http { status, message: body })
            }
            Err(ureq::Error::Transport(t)) => Err(ContromeClientError::Transport(t.to_string())),
        }
    }

    /// List the houses the account can see. Used once at setup to discover
    /// or confirm the configured house id.
    pub fn list_houses(&self) -> Result<Vec<RawHouse>, ContromeClientError> {
        self.get_json("/get/json/v1/houses/")
    }
}

impl ContromeApi for ContromeClient {
    fn fetch_house(&self, house: HouseId) -> Result<Vec<RawFloor>, ContromeClientError> {
        self.get_json(&format!("/get/json/v1/{}/temps/", house.0))
    }

    fn set_temporary_target(
        &self,
        house: HouseId,
        room: RoomId,
        target_celsius: f64,
        duration: TargetDuration,
    ) -> Result<(), ContromeClientError> {
        let url = format!("{}/set/json/v1/{}/ziel/{}/", self.base_url, house.0, room.0);
        let soll = target_celsius.to_string();

        let mut form: Vec<(&str, &str)> = vec![
            ("user", self.user.as_str()),
            ("password", self.password.as_str()),
            ("soll", soll.as_str()),
        ];
        let minutes;
        if let TargetDuration::Minutes(m) = duration {
            minutes = m.to_string();
            form.push(("duration", minutes.as_str()));
        }

        let resp = self
            .agent
            .post(&url)
            .set("Accept", "application/json")
            .send_form(&form);

        match resp {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status @ (401 | 403), res)) => {
                let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(ContromeClientError::Auth(format!("http {}: {}", status, body)))
            }
            Err(ureq::Error::Status(status, res)) => {
                let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(ContromeClientError::Http { status, message: body })
            }
            Err(ureq::Error::Transport(t)) => Err(ContromeClientError::Transport(t.to_string())),
        }
    }
}
