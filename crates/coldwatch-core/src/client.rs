//! Control client for a single unit's API.
//!
//! Unlike polling, control calls are operator-initiated and return errors
//! to the caller. They use the same permissive TLS client and `X-API-Key`
//! header as the prober, and transport failures carry the same diagnostics.
//!
//! Controllers report failures in two ways: a non-2xx status, or a 2xx
//! response whose body is `{"error": true, "message": "..."}` (or
//! `{"error": "..."}`). Both become errors here.
//!
//! # Example
//!
//! ```no_run
//! use coldwatch_core::client::DeviceClient;
//! use coldwatch_types::{Scheme, UnitRecord};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let unit = UnitRecord::new(1, "Walk-in 1", "10.0.0.5", "api-key");
//! let client = DeviceClient::for_unit(&unit, Scheme::Https, Duration::from_secs(3))?;
//!
//! let status = client.status().await?;
//! println!("Mode: {:?}", status.operating_mode);
//!
//! client.set_setpoint(2.0).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use coldwatch_types::{ParseError, ParsedStatus, Scheme, UnitRecord, is_success_status};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;
use tracing::debug;

use crate::prober::STATUS_ENDPOINT;
use crate::retry::{RetryConfig, retry_result};
use crate::status::parse_status;
use crate::transport::{API_KEY_HEADER, client_builder, describe_failure};
use crate::util::truncate_with_ellipsis;

const SYSTEM_INFO_ENDPOINT: &str = "/api/v1/system-info";
const SETPOINT_ENDPOINT: &str = "/api/v1/setpoint";
const ALARM_RESET_ENDPOINT: &str = "/api/v1/alarms/reset";
const DEFROST_ENDPOINT: &str = "/api/v1/defrost/trigger";
const DEMO_MODE_ENDPOINT: &str = "/api/v1/demo-mode";
const CONFIG_ENDPOINT: &str = "/api/v1/config";
const EVENTS_LOG_ENDPOINT: &str = "/api/v1/logs/events";
const CONDITIONS_LOG_ENDPOINT: &str = "/api/v1/logs/conditions";

/// Error type for control operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The unit record has no usable address.
    #[error(transparent)]
    InvalidUnit(#[from] ParseError),

    /// No HTTP exchange completed.
    #[error("Unit not reachable at {url}: {diagnostic}")]
    NotReachable { url: String, diagnostic: String },

    /// The API answered with a non-2xx status.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The device reported a failure in an otherwise successful response.
    #[error("Device rejected the request: {message}")]
    Device { message: String },

    /// The response could not be decoded.
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// Building the HTTP client failed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Result type for control operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

// ==========================================================================
// Response Types
// ==========================================================================

/// Response to a setpoint change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpointResponse {
    #[serde(default)]
    pub success: bool,
    /// The setpoint now in effect.
    pub setpoint: Option<f64>,
    pub timestamp: Option<i64>,
}

/// Response to a one-shot action such as an alarm reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub success: bool,
    pub message: Option<String>,
    pub timestamp: Option<i64>,
}

/// Response to a demo-mode change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoModeResponse {
    #[serde(default)]
    pub success: bool,
    pub message: Option<String>,
    /// Demo mode after the change.
    pub demo_mode: bool,
    /// Demo mode before the change.
    pub previous_state: Option<bool>,
}

/// Response to a configuration update.
///
/// The device applies what it can: `updated` lists accepted keys, `skipped`
/// read-only or protected keys and `errors` rejected values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdateResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub updated: BTreeMap<String, String>,
    #[serde(default)]
    pub skipped: BTreeMap<String, String>,
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
    pub message: Option<String>,
}

/// Flat controller configuration as reported by `/api/v1/system-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Dotted keys such as `setpoint.high_limit`, values as text.
    pub entries: BTreeMap<String, String>,
    /// Device timestamp.
    pub timestamp: Option<i64>,
}

impl SystemInfo {
    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn from_value(value: Value) -> Option<Self> {
        let Value::Object(map) = value else {
            return None;
        };
        let mut info = SystemInfo::default();
        for (key, value) in map {
            if key == "timestamp" {
                info.timestamp = value.as_i64();
                continue;
            }
            let text = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            info.entries.insert(key, text);
        }
        Some(info)
    }
}

/// The failure message embedded in a device response, if any.
fn device_error(value: &Value) -> Option<String> {
    let message = value.get("message").and_then(Value::as_str);
    match value.get("error")? {
        Value::Bool(true) => Some(message.unwrap_or("device reported an error").to_string()),
        Value::String(text) if !text.trim().is_empty() => {
            Some(message.unwrap_or(text.as_str()).to_string())
        }
        _ => None,
    }
}

/// Text for a non-2xx response body.
fn api_error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body)
        && let Some(message) = device_error(&value)
    {
        return message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        truncate_with_ellipsis(trimmed, 200)
    }
}

// ==========================================================================
// DeviceClient Implementation
// ==========================================================================

/// HTTP client for one unit's control API.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl DeviceClient {
    /// Create a client for `unit` with its own HTTP client.
    pub fn for_unit(unit: &UnitRecord, scheme: Scheme, timeout: Duration) -> ClientResult<Self> {
        let client = client_builder(timeout)
            .build()
            .map_err(ClientError::HttpClient)?;
        Self::with_client(unit, scheme, client)
    }

    /// Create a client for `unit` around an existing HTTP client.
    pub fn with_client(unit: &UnitRecord, scheme: Scheme, client: Client) -> ClientResult<Self> {
        Ok(Self {
            client,
            base_url: unit.base_url(scheme)?,
            api_key: unit.api_key().map(str::to_string),
            retry: RetryConfig::for_control(),
        })
    }

    /// Set the retry policy for read requests. Writes are never retried.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full status, interpreted.
    pub async fn status(&self) -> ClientResult<ParsedStatus> {
        let body = self.get_text(STATUS_ENDPOINT, &[]).await?;
        if let Ok(value) = serde_json::from_str::<Value>(&body)
            && let Some(message) = device_error(&value)
        {
            return Err(ClientError::Device { message });
        }
        Ok(parse_status(&body))
    }

    /// Controller configuration.
    pub async fn system_info(&self) -> ClientResult<SystemInfo> {
        let value = self.get_json(SYSTEM_INFO_ENDPOINT).await?;
        SystemInfo::from_value(value).ok_or_else(|| ClientError::InvalidResponse {
            url: self.url(SYSTEM_INFO_ENDPOINT),
            message: "expected a JSON object".to_string(),
        })
    }

    /// Change the temperature setpoint.
    pub async fn set_setpoint(&self, setpoint: f64) -> ClientResult<SetpointResponse> {
        let body = serde_json::json!({ "setpoint": setpoint });
        let value = self.post_json(SETPOINT_ENDPOINT, &body).await?;
        let response: SetpointResponse = self.decode(SETPOINT_ENDPOINT, value)?;
        ensure_success(response.success, None)?;
        Ok(response)
    }

    /// Reset latched alarms.
    pub async fn reset_alarms(&self) -> ClientResult<ActionResponse> {
        self.action(ALARM_RESET_ENDPOINT).await
    }

    /// Start a manual defrost.
    pub async fn trigger_defrost(&self) -> ClientResult<ActionResponse> {
        self.action(DEFROST_ENDPOINT).await
    }

    /// Whether demo mode is on.
    pub async fn demo_mode(&self) -> ClientResult<bool> {
        let value = self.get_json(DEMO_MODE_ENDPOINT).await?;
        value
            .get("demo_mode")
            .and_then(Value::as_bool)
            .ok_or_else(|| ClientError::InvalidResponse {
                url: self.url(DEMO_MODE_ENDPOINT),
                message: "missing 'demo_mode'".to_string(),
            })
    }

    /// Turn demo mode on or off.
    pub async fn set_demo_mode(&self, enable: bool) -> ClientResult<DemoModeResponse> {
        let body = serde_json::json!({ "enable": enable });
        let value = self.post_json(DEMO_MODE_ENDPOINT, &body).await?;
        let response: DemoModeResponse = self.decode(DEMO_MODE_ENDPOINT, value)?;
        ensure_success(response.success, response.message.as_deref())?;
        Ok(response)
    }

    /// Post configuration changes.
    ///
    /// A response listing only skipped or rejected keys is returned as is;
    /// check [`ConfigUpdateResponse::errors`].
    pub async fn update_config(
        &self,
        changes: &BTreeMap<String, Value>,
    ) -> ClientResult<ConfigUpdateResponse> {
        let value = self.post_json(CONFIG_ENDPOINT, changes).await?;
        self.decode(CONFIG_ENDPOINT, value)
    }

    /// The events log for `date`, as plain text.
    pub async fn events_log(&self, date: Date) -> ClientResult<String> {
        self.get_text(EVENTS_LOG_ENDPOINT, &[("date", format_date(date))])
            .await
    }

    /// The conditions log for `date`, as plain text.
    pub async fn conditions_log(&self, date: Date) -> ClientResult<String> {
        self.get_text(CONDITIONS_LOG_ENDPOINT, &[("date", format_date(date))])
            .await
    }

    // ======================================================================
    // Internal HTTP helpers
    // ======================================================================

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, self.url(path))
            .header(ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        request
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> ClientResult<String> {
        let url = self.url(path);
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::NotReachable {
                url: url.clone(),
                diagnostic: describe_failure(&e),
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::NotReachable {
                url: url.clone(),
                diagnostic: describe_failure(&e),
            })?;
        debug!("{} -> {}", url, status);

        if !is_success_status(status) {
            return Err(ClientError::Api {
                status,
                message: api_error_message(status, &body),
            });
        }
        Ok(body)
    }

    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> ClientResult<String> {
        retry_result(
            &self.retry,
            path,
            || self.send(self.request(Method::GET, path).query(query), path),
            |e| matches!(e, ClientError::NotReachable { .. }),
        )
        .await
    }

    async fn get_json(&self, path: &str) -> ClientResult<Value> {
        let body = self.get_text(path, &[]).await?;
        self.parse(path, &body)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<Value> {
        let text = self
            .send(self.request(Method::POST, path).json(body), path)
            .await?;
        self.parse(path, &text)
    }

    async fn action(&self, path: &str) -> ClientResult<ActionResponse> {
        let value = self.post_json(path, &serde_json::json!({})).await?;
        let response: ActionResponse = self.decode(path, value)?;
        ensure_success(response.success, response.message.as_deref())?;
        Ok(response)
    }

    fn parse(&self, path: &str, body: &str) -> ClientResult<Value> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| ClientError::InvalidResponse {
                url: self.url(path),
                message: e.to_string(),
            })?;
        if let Some(message) = device_error(&value) {
            return Err(ClientError::Device { message });
        }
        Ok(value)
    }

    fn decode<T: DeserializeOwned>(&self, path: &str, value: Value) -> ClientResult<T> {
        serde_json::from_value(value).map_err(|e| ClientError::InvalidResponse {
            url: self.url(path),
            message: e.to_string(),
        })
    }
}

fn ensure_success(success: bool, message: Option<&str>) -> ClientResult<()> {
    if success {
        Ok(())
    } else {
        Err(ClientError::Device {
            message: message.unwrap_or("request was not applied").to_string(),
        })
    }
}

/// `YYYY-MM-DD`.
fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}
