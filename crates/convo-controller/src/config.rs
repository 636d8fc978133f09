//! Convo Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default maximum concurrent participants per conversation.
pub const DEFAULT_CONFERENCE_CAPACITY: usize = 8;

/// Default store-wide limit on live conference records.
pub const DEFAULT_MAX_CONFERENCES: usize = 100_000;

/// Default bound on the media-server reservation call in milliseconds.
pub const DEFAULT_MEDIA_RESERVE_TIMEOUT_MS: u64 = 3000;

/// Default server-side ceiling on every RPC in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default idle time after which an empty conference is evicted.
pub const DEFAULT_IDLE_CONFERENCE_TTL_SECONDS: u64 = 300;

/// Default janitor period in seconds.
pub const DEFAULT_JANITOR_INTERVAL_SECONDS: u64 = 60;

/// Upper bound on `CONVO_MEDIA_RESERVE_TIMEOUT_MS`.
pub const MAX_MEDIA_RESERVE_TIMEOUT_MS: u64 = 60_000;

/// Upper bound on `CONVO_REQUEST_TIMEOUT_SECONDS`.
pub const MAX_REQUEST_TIMEOUT_SECONDS: u64 = 3_600;

/// Upper bound on the idle TTL and the janitor period, in seconds.
pub const MAX_JANITOR_SECONDS: u64 = 86_400;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "convo";

/// Convo Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP server bind address (default: "0.0.0.0:8090").
    pub bind_address: String,

    /// Master secret for connection token HMAC (base64-encoded).
    /// Protected by `SecretString` to prevent accidental logging.
    pub token_secret: SecretString,

    /// Shared secret the media server signs its reports with (base64-encoded).
    pub media_event_secret: SecretString,

    /// Maximum concurrent participants per conversation.
    pub conference_capacity: usize,

    /// Maximum number of conference records held in memory.
    pub max_conferences: usize,

    /// Base URL of the media-server reservation API.
    pub media_server_url: String,

    /// Base URL of the membership-policy API.
    pub membership_url: String,

    /// Notification fan-out webhook. `None` disables fan-out.
    pub notification_url: Option<String>,

    /// Bound on the out-of-lock media-server reservation.
    pub media_reserve_timeout_ms: u64,

    /// Ceiling applied to every RPC, and to caller-supplied deadlines.
    pub request_timeout_seconds: u64,

    /// Idle time after which an empty conference may be evicted.
    pub idle_conference_ttl_seconds: u64,

    /// Janitor sweep period.
    pub janitor_interval_seconds: u64,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Emit logs as JSON.
    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("token_secret", &"[REDACTED]")
            .field("media_event_secret", &"[REDACTED]")
            .field("conference_capacity", &self.conference_capacity)
            .field("max_conferences", &self.max_conferences)
            .field("media_server_url", &self.media_server_url)
            .field("membership_url", &self.membership_url)
            .field("notification_url", &self.notification_url)
            .field("media_reserve_timeout_ms", &self.media_reserve_timeout_ms)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field(
                "idle_conference_ttl_seconds",
                &self.idle_conference_ttl_seconds,
            )
            .field("janitor_interval_seconds", &self.janitor_interval_seconds)
            .field("instance_id", &self.instance_id)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// Numeric settings that do not parse fall back to their defaults;
    /// settings that parse but are out of range are rejected.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let token_secret = SecretString::from(
            vars.get("CONVO_TOKEN_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("CONVO_TOKEN_SECRET".to_string()))?
                .clone(),
        );

        let media_event_secret = SecretString::from(
            vars.get("CONVO_MEDIA_EVENT_SECRET")
                .ok_or_else(|| {
                    ConfigError::MissingEnvVar("CONVO_MEDIA_EVENT_SECRET".to_string())
                })?
                .clone(),
        );

        let media_server_url = vars
            .get("CONVO_MEDIA_SERVER_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("CONVO_MEDIA_SERVER_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let membership_url = vars
            .get("CONVO_MEMBERSHIP_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("CONVO_MEMBERSHIP_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let notification_url = vars
            .get("CONVO_NOTIFICATION_URL")
            .filter(|url| !url.is_empty())
            .cloned();

        let bind_address = vars
            .get("CONVO_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        // Capacity must parse; other numbers fall back when unparsable
        let conference_capacity = match vars.get("CONVO_CONFERENCE_CAPACITY") {
            Some(raw) => {
                let capacity: usize = raw.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "CONVO_CONFERENCE_CAPACITY must be a positive integer: {e}"
                    ))
                })?;
                if capacity == 0 {
                    return Err(ConfigError::InvalidValue(
                        "CONVO_CONFERENCE_CAPACITY must be at least 1".to_string(),
                    ));
                }
                capacity
            }
            None => DEFAULT_CONFERENCE_CAPACITY,
        };

        let max_conferences = bounded_var(
            vars,
            "CONVO_MAX_CONFERENCES",
            DEFAULT_MAX_CONFERENCES,
            1,
            usize::MAX,
        )?;

        let media_reserve_timeout_ms = bounded_var(
            vars,
            "CONVO_MEDIA_RESERVE_TIMEOUT_MS",
            DEFAULT_MEDIA_RESERVE_TIMEOUT_MS,
            1,
            MAX_MEDIA_RESERVE_TIMEOUT_MS,
        )?;

        let request_timeout_seconds = bounded_var(
            vars,
            "CONVO_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
            1,
            MAX_REQUEST_TIMEOUT_SECONDS,
        )?;

        let idle_conference_ttl_seconds = bounded_var(
            vars,
            "CONVO_IDLE_CONFERENCE_TTL_SECONDS",
            DEFAULT_IDLE_CONFERENCE_TTL_SECONDS,
            1,
            MAX_JANITOR_SECONDS,
        )?;

        let janitor_interval_seconds = bounded_var(
            vars,
            "CONVO_JANITOR_INTERVAL_SECONDS",
            DEFAULT_JANITOR_INTERVAL_SECONDS,
            1,
            MAX_JANITOR_SECONDS,
        )?;

        let log_json = vars
            .get("CONVO_LOG_JSON")
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        let instance_id = vars.get("CONVO_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            token_secret,
            media_event_secret,
            conference_capacity,
            max_conferences,
            media_server_url,
            membership_url,
            notification_url,
            media_reserve_timeout_ms,
            request_timeout_seconds,
            idle_conference_ttl_seconds,
            janitor_interval_seconds,
            instance_id,
            log_json,
        })
    }

    /// Bound on the media-server reservation call.
    #[must_use]
    pub fn media_reserve_timeout(&self) -> Duration {
        Duration::from_millis(self.media_reserve_timeout_ms)
    }

    /// Ceiling applied to every RPC.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Read an optional number, falling back to `default` when unset or
/// unparsable and rejecting values outside `min..=max`.
fn bounded_var<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display + Copy,
{
    let Some(value) = vars.get(name).and_then(|s| s.parse::<T>().ok()) else {
        return Ok(default);
    };
    if value < min || value > max {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "CONVO_TOKEN_SECRET".to_string(),
                "dGVzdC1zZWNyZXQtMTIzNDU2Nzg5MC1hYmNkZWZnaGlqa2xtbm9w".to_string(),
            ),
            (
                "CONVO_MEDIA_EVENT_SECRET".to_string(),
                "bWVkaWEtZXZlbnQtc2VjcmV0LTEyMzQ1Njc4OTAtYWJjZGVm".to_string(),
            ),
            (
                "CONVO_MEDIA_SERVER_URL".to_string(),
                "http://media.internal:9000/".to_string(),
            ),
            (
                "CONVO_MEMBERSHIP_URL".to_string(),
                "http://membership.internal:9001".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.conference_capacity, DEFAULT_CONFERENCE_CAPACITY);
        assert_eq!(config.max_conferences, DEFAULT_MAX_CONFERENCES);
        // Trailing slash is trimmed so paths can be appended
        assert_eq!(config.media_server_url, "http://media.internal:9000");
        assert_eq!(config.membership_url, "http://membership.internal:9001");
        assert!(config.notification_url.is_none());
        assert_eq!(
            config.media_reserve_timeout(),
            Duration::from_millis(DEFAULT_MEDIA_RESERVE_TIMEOUT_MS)
        );
        assert_eq!(
            config.request_timeout(),
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.idle_conference_ttl_seconds,
            DEFAULT_IDLE_CONFERENCE_TTL_SECONDS
        );
        assert_eq!(
            config.janitor_interval_seconds,
            DEFAULT_JANITOR_INTERVAL_SECONDS
        );
        assert!(!config.log_json);
        assert!(config.instance_id.starts_with("convo-"));
        assert!(config
            .token_secret
            .expose_secret()
            .starts_with("dGVzdC1zZWNyZXQ"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "CONVO_BIND_ADDRESS".to_string(),
            "127.0.0.1:9999".to_string(),
        );
        vars.insert("CONVO_CONFERENCE_CAPACITY".to_string(), "4".to_string());
        vars.insert("CONVO_MAX_CONFERENCES".to_string(), "10".to_string());
        vars.insert(
            "CONVO_NOTIFICATION_URL".to_string(),
            "http://notify.internal/hook".to_string(),
        );
        vars.insert(
            "CONVO_MEDIA_RESERVE_TIMEOUT_MS".to_string(),
            "250".to_string(),
        );
        vars.insert("CONVO_REQUEST_TIMEOUT_SECONDS".to_string(), "5".to_string());
        vars.insert(
            "CONVO_IDLE_CONFERENCE_TTL_SECONDS".to_string(),
            "30".to_string(),
        );
        vars.insert(
            "CONVO_JANITOR_INTERVAL_SECONDS".to_string(),
            "7".to_string(),
        );
        vars.insert("CONVO_INSTANCE_ID".to_string(), "convo-test-1".to_string());
        vars.insert("CONVO_LOG_JSON".to_string(), "true".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9999");
        assert_eq!(config.conference_capacity, 4);
        assert_eq!(config.max_conferences, 10);
        assert_eq!(
            config.notification_url.as_deref(),
            Some("http://notify.internal/hook")
        );
        assert_eq!(config.media_reserve_timeout(), Duration::from_millis(250));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_conference_ttl_seconds, 30);
        assert_eq!(config.janitor_interval_seconds, 7);
        assert_eq!(config.instance_id, "convo-test-1");
        assert!(config.log_json);
    }

    #[test]
    fn test_empty_notification_url_disables_fan_out() {
        let mut vars = base_vars();
        vars.insert("CONVO_NOTIFICATION_URL".to_string(), String::new());

        let config = Config::from_vars(&vars).unwrap();
        assert!(config.notification_url.is_none());
    }

    #[test]
    fn test_unparsable_optional_numbers_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("CONVO_MAX_CONFERENCES".to_string(), "lots".to_string());
        vars.insert(
            "CONVO_MEDIA_RESERVE_TIMEOUT_MS".to_string(),
            "-1".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.max_conferences, DEFAULT_MAX_CONFERENCES);
        assert_eq!(
            config.media_reserve_timeout_ms,
            DEFAULT_MEDIA_RESERVE_TIMEOUT_MS
        );
    }

    #[test]
    fn test_invalid_capacity_is_rejected() {
        let mut vars = base_vars();
        vars.insert("CONVO_CONFERENCE_CAPACITY".to_string(), "eight".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("CONVO_CONFERENCE_CAPACITY")));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut vars = base_vars();
        vars.insert("CONVO_CONFERENCE_CAPACITY".to_string(), "0".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_missing_token_secret() {
        let mut vars = base_vars();
        vars.remove("CONVO_TOKEN_SECRET");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "CONVO_TOKEN_SECRET"));
    }

    #[test]
    fn test_zero_janitor_interval_is_rejected() {
        let mut vars = base_vars();
        vars.insert("CONVO_JANITOR_INTERVAL_SECONDS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("CONVO_JANITOR_INTERVAL_SECONDS")));
    }

    #[test]
    fn test_huge_request_timeout_is_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "CONVO_REQUEST_TIMEOUT_SECONDS".to_string(),
            u64::MAX.to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("CONVO_REQUEST_TIMEOUT_SECONDS")));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        for name in [
            "CONVO_MAX_CONFERENCES",
            "CONVO_MEDIA_RESERVE_TIMEOUT_MS",
            "CONVO_REQUEST_TIMEOUT_SECONDS",
            "CONVO_IDLE_CONFERENCE_TTL_SECONDS",
        ] {
            let mut vars = base_vars();
            vars.insert(name.to_string(), "0".to_string());
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{name}=0 should be rejected"
            );
        }
    }

    #[test]
    fn test_upper_bounds_are_inclusive() {
        let mut vars = base_vars();
        vars.insert(
            "CONVO_REQUEST_TIMEOUT_SECONDS".to_string(),
            MAX_REQUEST_TIMEOUT_SECONDS.to_string(),
        );
        vars.insert(
            "CONVO_JANITOR_INTERVAL_SECONDS".to_string(),
            MAX_JANITOR_SECONDS.to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.request_timeout_seconds, MAX_REQUEST_TIMEOUT_SECONDS);
        assert_eq!(config.janitor_interval_seconds, MAX_JANITOR_SECONDS);
    }

    #[test]
    fn test_from_vars_missing_media_event_secret() {
        let mut vars = base_vars();
        vars.remove("CONVO_MEDIA_EVENT_SECRET");

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "CONVO_MEDIA_EVENT_SECRET")
        );
    }

    #[test]
    fn test_from_vars_missing_media_server_url() {
        let mut vars = base_vars();
        vars.remove("CONVO_MEDIA_SERVER_URL");

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "CONVO_MEDIA_SERVER_URL")
        );
    }

    #[test]
    fn test_from_vars_missing_membership_url() {
        let mut vars = base_vars();
        vars.remove("CONVO_MEMBERSHIP_URL");

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "CONVO_MEMBERSHIP_URL")
        );
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&base_vars()).unwrap();

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("dGVzdC1zZWNyZXQ"));
        assert!(!debug_output.contains("bWVkaWEtZXZlbnQ"));
        assert!(debug_output.contains("media.internal"));
    }
}
