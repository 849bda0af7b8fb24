//! Core types for unit records, poll results and parsed device status.

use core::fmt;
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// Default API port of a refrigeration controller.
pub const DEFAULT_API_PORT: u16 = 8095;

#[cfg(feature = "serde")]
fn default_port() -> u16 {
    DEFAULT_API_PORT
}

/// URL scheme used to reach a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Scheme {
    /// Plain HTTP. Only useful for lab setups and tests.
    Http,
    /// HTTPS with whatever certificate the controller presents.
    #[default]
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

impl FromStr for Scheme {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(ParseError::UnknownScheme(other.to_string())),
        }
    }
}

/// Identity and connection info for one managed unit.
///
/// Records are owned by the registry. Pollers work on a cloned snapshot and
/// never write back.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnitRecord {
    /// Stable local identifier assigned at registration.
    pub id: u64,
    /// User-facing unit name or number.
    pub display_id: String,
    /// Host name or IP address of the controller.
    pub address: String,
    /// API port.
    #[cfg_attr(feature = "serde", serde(default = "default_port"))]
    pub port: u16,
    /// Opaque credential sent as `X-API-Key`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub api_key: String,
    /// Persisted ordering index; lower values list first.
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: u32,
}

impl UnitRecord {
    /// Create a record with the default port and position 0.
    pub fn new(
        id: u64,
        display_id: impl Into<String>,
        address: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id,
            display_id: display_id.into(),
            address: address.into(),
            port: DEFAULT_API_PORT,
            api_key: api_key.into(),
            position: 0,
        }
    }

    /// Set the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The identity used for notifications and events.
    pub fn identity(&self) -> UnitIdentity {
        UnitIdentity {
            id: self.id,
            display_id: self.display_id.clone(),
        }
    }

    /// The API key, or `None` when it is blank.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty()).then_some(key)
    }

    /// Normalized host part of the address.
    ///
    /// Leading `http://` / `https://` and trailing slashes are stripped.
    /// Bare IPv6 literals are bracketed so they can be joined with a port.
    pub fn host(&self) -> ParseResult<String> {
        let trimmed = self.address.trim();
        let host = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed)
            .trim_end_matches('/');

        if host.is_empty() {
            return Err(ParseError::InvalidAddress(
                "address cannot be empty".to_string(),
            ));
        }
        if host.contains('/') || host.chars().any(char::is_whitespace) {
            return Err(ParseError::InvalidAddress(format!(
                "'{}' is not a host name or IP address",
                self.address
            )));
        }
        if host.starts_with('[') && host.ends_with(']') {
            return Ok(host.to_string());
        }
        if host.parse::<Ipv6Addr>().is_ok() {
            return Ok(format!("[{}]", host));
        }
        if host.contains(':') {
            return Err(ParseError::InvalidAddress(format!(
                "'{}' must not include a port (use the port field)",
                self.address
            )));
        }
        Ok(host.to_string())
    }

    /// Base URL (`scheme://host:port`) of the unit's API.
    pub fn base_url(&self, scheme: Scheme) -> ParseResult<String> {
        if self.port == 0 {
            return Err(ParseError::InvalidAddress("port cannot be 0".to_string()));
        }
        Ok(format!("{}://{}:{}", scheme, self.host()?, self.port))
    }
}

/// The subset of a unit record that identifies it to users.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnitIdentity {
    /// Stable local identifier.
    pub id: u64,
    /// User-facing unit name.
    pub display_id: String,
}

impl fmt::Display for UnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_id)
    }
}

/// Returns `true` for HTTP status codes in the 2xx range.
pub fn is_success_status(status: u16) -> bool {
    (200..=299).contains(&status)
}

/// Result of one probe attempt against one endpoint.
///
/// When `reachable` is true the status is 2xx and `raw_body` holds the
/// device's response (or `None` when it was blank). Otherwise `raw_body`
/// carries the error body, or a diagnostic message when no HTTP exchange
/// completed at all.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PollOutcome {
    /// True when the endpoint answered with 2xx.
    pub reachable: bool,
    /// HTTP status, if an exchange completed.
    pub http_status: Option<u16>,
    /// Body or diagnostic text.
    pub raw_body: Option<String>,
    /// Path that produced this outcome.
    pub endpoint_tried: String,
}

impl PollOutcome {
    /// Build an outcome from a completed HTTP exchange.
    pub fn from_response(endpoint: impl Into<String>, status: u16, body: String) -> Self {
        Self {
            reachable: is_success_status(status),
            http_status: Some(status),
            raw_body: (!body.trim().is_empty()).then_some(body),
            endpoint_tried: endpoint.into(),
        }
    }

    /// Build an outcome for a request that never produced an HTTP response.
    pub fn transport_failure(endpoint: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            reachable: false,
            http_status: None,
            raw_body: Some(diagnostic.into()),
            endpoint_tried: endpoint.into(),
        }
    }

    /// True when the attempt failed without any HTTP status.
    pub fn is_network_failure(&self) -> bool {
        !self.reachable && self.http_status.is_none()
    }

    /// True when a non-blank body or diagnostic is attached.
    pub fn has_body(&self) -> bool {
        self.raw_body
            .as_deref()
            .is_some_and(|body| !body.trim().is_empty())
    }
}

/// Structured view of a `/api/v1/status` response.
///
/// Every field is optional or empty when the device did not report it; a
/// missing sensor is absent from the map rather than reported as zero.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParsedStatus {
    /// Device-reported operating mode, e.g. "cooling" or "defrost".
    pub operating_mode: Option<String>,
    /// Sensor readings by name.
    pub sensors: BTreeMap<String, f64>,
    /// Relay states by name.
    pub relays: BTreeMap<String, bool>,
    /// Temperature setpoint.
    pub setpoint: Option<f64>,
    /// True when the device reports an alarm.
    pub alarm_active: bool,
    /// Human-readable alarm summary.
    pub alarm_description: Option<String>,
    /// Active alarm codes, when the device lists them.
    pub alarm_codes: Vec<String>,
    /// Device timestamp (seconds since the epoch).
    pub timestamp: Option<i64>,
    /// Controller system name.
    pub system: Option<String>,
    /// Controller firmware version.
    pub version: Option<String>,
}

impl ParsedStatus {
    /// Look up a sensor reading.
    pub fn sensor(&self, name: &str) -> Option<f64> {
        self.sensors.get(name).copied()
    }

    /// True when nothing usable was parsed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Per-unit reconciliation state.
///
/// Lives for as long as the unit is registered and the monitor runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnitPollState {
    /// Debounced reachability; `None` until the first decision.
    pub last_known_reachable: Option<bool>,
    /// Failed polls since the last success.
    pub consecutive_failure_count: u32,
    /// Time of the last successful poll.
    #[cfg_attr(feature = "serde", serde(default, with = "time::serde::rfc3339::option"))]
    pub last_success_at: Option<OffsetDateTime>,
    /// Whether an alarm notification is currently outstanding.
    pub alarm_currently_notified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(address: &str) -> UnitRecord {
        UnitRecord::new(1, "Walk-in 1", address, "secret")
    }

    #[test]
    fn test_host_strips_scheme_and_slashes() {
        assert_eq!(unit("https://10.0.0.5/").host().unwrap(), "10.0.0.5");
        assert_eq!(unit("http://cooler.local//").host().unwrap(), "cooler.local");
        assert_eq!(unit("  192.168.1.20 ").host().unwrap(), "192.168.1.20");
    }

    #[test]
    fn test_host_brackets_ipv6() {
        assert_eq!(unit("fe80::1").host().unwrap(), "[fe80::1]");
        assert_eq!(unit("[::1]").host().unwrap(), "[::1]");
    }

    #[test]
    fn test_host_rejects_bad_addresses() {
        assert!(matches!(
            unit("").host(),
            Err(ParseError::InvalidAddress(_))
        ));
        assert!(matches!(
            unit("https://").host(),
            Err(ParseError::InvalidAddress(_))
        ));
        assert!(unit("10.0.0.5:8095").host().is_err());
        assert!(unit("host/path").host().is_err());
        assert!(unit("two words").host().is_err());
    }

    #[test]
    fn test_base_url() {
        let record = unit("10.0.0.5").with_port(9443);
        assert_eq!(
            record.base_url(Scheme::Https).unwrap(),
            "https://10.0.0.5:9443"
        );
        assert_eq!(
            record.base_url(Scheme::Http).unwrap(),
            "http://10.0.0.5:9443"
        );
        assert!(unit("10.0.0.5").with_port(0).base_url(Scheme::Https).is_err());
    }

    #[test]
    fn test_api_key_blank_is_none() {
        assert_eq!(unit("h").api_key(), Some("secret"));
        let mut record = unit("h");
        record.api_key = "   ".to_string();
        assert_eq!(record.api_key(), None);
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!("HTTPS".parse::<Scheme>().unwrap(), Scheme::Https);
        assert_eq!("http".parse::<Scheme>().unwrap(), Scheme::Http);
        assert_eq!(
            "ftp".parse::<Scheme>(),
            Err(ParseError::UnknownScheme("ftp".to_string()))
        );
        assert_eq!(Scheme::default(), Scheme::Https);
    }

    #[test]
    fn test_outcome_from_response() {
        let ok = PollOutcome::from_response("/api/v1/health", 204, String::new());
        assert!(ok.reachable);
        assert_eq!(ok.raw_body, None);

        let err = PollOutcome::from_response("/api/v1/status", 500, "overload".to_string());
        assert!(!err.reachable);
        assert_eq!(err.http_status, Some(500));
        assert!(err.has_body());
        assert!(!err.is_network_failure());
    }

    #[test]
    fn test_outcome_transport_failure() {
        let outcome = PollOutcome::transport_failure("/api/v1/status", "Connection refused");
        assert!(!outcome.reachable);
        assert!(outcome.is_network_failure());
        assert_eq!(outcome.raw_body.as_deref(), Some("Connection refused"));
    }

    #[test]
    fn test_parsed_status_empty() {
        let status = ParsedStatus::default();
        assert!(status.is_empty());
        assert!(!status.alarm_active);
        assert_eq!(status.sensor("return_temp"), None);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_unit_record_serde_defaults() {
        let json = r#"{"id": 3, "display_id": "Reach-in", "address": "10.1.1.1"}"#;
        let record: UnitRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.port, DEFAULT_API_PORT);
        assert_eq!(record.api_key, "");
        assert_eq!(record.position, 0);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_poll_state_serde() {
        let state = UnitPollState {
            last_known_reachable: Some(true),
            consecutive_failure_count: 1,
            last_success_at: Some(OffsetDateTime::UNIX_EPOCH),
            alarm_currently_notified: false,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("1970-01-01T00:00:00Z"));
        let back: UnitPollState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
