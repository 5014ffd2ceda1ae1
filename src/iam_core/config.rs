//! Endpoint and timing configuration for the IAM session core.
//!
//! Values come from code ([`IamConfig::new`]), a JSON document
//! ([`IamConfig::from_json_str`]) or the process environment
//! ([`IamConfig::from_env`]). Every field except `iam_url` has a default.
//!
//! ```
//! use hsdp_iam::IamConfig;
//!
//! let config = IamConfig::from_json_str(r#"{"iam_url": "https://iam-client-test.us-east.philips-healthdata.com"}"#).unwrap();
//! assert_eq!(config.safety_margin_secs, 60);
//! assert_eq!(config.token_url(), "https://iam-client-test.us-east.philips-healthdata.com/authorize/oauth2/token");
//! ```

use std::time::Duration;
use chrono::TimeDelta;
use serde::Deserialize;
use super::error::IamError;

const ENV_IAM_URL: &str = "HSDP_IAM_URL";
const ENV_SAFETY_MARGIN: &str = "HSDP_IAM_SAFETY_MARGIN";
const ENV_TIMEOUT: &str = "HSDP_IAM_TIMEOUT";

/// Largest accepted safety margin, one day.
pub const MAX_SAFETY_MARGIN_SECS: u64 = 86_400;

fn default_safety_margin_secs() -> u64 {
    60
}

fn default_token_api_version() -> String {
    "2".to_string()
}

fn default_introspect_api_version() -> String {
    "4".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// IAM endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IamConfig {
    /// Base URL of the IAM service, without trailing slash.
    pub iam_url: String,

    /// Seconds before expiry at which a token is refreshed.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,

    /// `Api-Version` header sent to the token and revoke endpoints.
    #[serde(default = "default_token_api_version")]
    pub token_api_version: String,

    /// `Api-Version` header sent to the introspection endpoint.
    #[serde(default = "default_introspect_api_version")]
    pub introspect_api_version: String,

    /// Transport timeout applied to every request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl IamConfig {
    /// Configuration with defaults for the given IAM base URL.
    pub fn new(iam_url: impl Into<String>) -> Self {
        IamConfig {
            iam_url: iam_url.into().trim_end_matches('/').to_string(),
            safety_margin_secs: default_safety_margin_secs(),
            token_api_version: default_token_api_version(),
            introspect_api_version: default_introspect_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, IamError> {
        let mut config: IamConfig = serde_json::from_str(json).map_err(|e| IamError::Config(e.to_string()))?;
        config.iam_url = config.iam_url.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    /// Reads `HSDP_IAM_URL`, `HSDP_IAM_SAFETY_MARGIN` and `HSDP_IAM_TIMEOUT`.
    pub fn from_env() -> Result<Self, IamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, IamError> {
        let iam_url = lookup(ENV_IAM_URL).ok_or_else(|| IamError::Config(format!("{ENV_IAM_URL} is not set")))?;
        let mut config = IamConfig::new(iam_url);
        if let Some(margin) = lookup(ENV_SAFETY_MARGIN) {
            config.safety_margin_secs = margin
                .parse()
                .map_err(|_| IamError::Config(format!("{ENV_SAFETY_MARGIN} must be a number of seconds")))?;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT) {
            config.request_timeout_secs = timeout
                .parse()
                .map_err(|_| IamError::Config(format!("{ENV_TIMEOUT} must be a number of seconds")))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects unusable URLs, timeouts and safety margins.
    pub fn validate(&self) -> Result<(), IamError> {
        if !(self.iam_url.starts_with("https://") || self.iam_url.starts_with("http://")) {
            return Err(IamError::Config(format!("iam_url must be an http(s) URL, got {:?}", self.iam_url)));
        }
        if self.request_timeout_secs == 0 {
            return Err(IamError::Config("request_timeout_secs must be positive".into()));
        }
        if self.safety_margin_secs > MAX_SAFETY_MARGIN_SECS {
            return Err(IamError::Config(format!(
                "safety_margin_secs must be at most {MAX_SAFETY_MARGIN_SECS}, got {}",
                self.safety_margin_secs
            )));
        }
        Ok(())
    }

    /// Safety margin as a signed duration, capped at [`MAX_SAFETY_MARGIN_SECS`]
    /// for configs built without [`validate`](Self::validate).
    pub fn safety_margin(&self) -> TimeDelta {
        i64::try_from(self.safety_margin_secs.min(MAX_SAFETY_MARGIN_SECS))
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or_else(TimeDelta::zero)
    }

    /// Transport timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Token endpoint, also used for refresh.
    pub fn token_url(&self) -> String {
        format!("{}/authorize/oauth2/token", self.iam_url)
    }

    /// Introspection endpoint.
    pub fn introspect_url(&self) -> String {
        format!("{}/authorize/oauth2/introspect", self.iam_url)
    }

    /// Revocation endpoint.
    pub fn revoke_url(&self) -> String {
        format!("{}/authorize/oauth2/revoke", self.iam_url)
    }

    /// Audience of JWT-bearer service assertions.
    pub fn assertion_audience(&self) -> String {
        format!("{}/oauth2/access_token", self.iam_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn json_defaults_and_trailing_slash() {
        let config = IamConfig::from_json_str(r#"{"iam_url": "https://iam.example.com/", "safety_margin_secs": 120}"#).unwrap();
        assert_eq!(config.iam_url, "https://iam.example.com");
        assert_eq!(config.safety_margin_secs, 120);
        assert_eq!(config.token_api_version, "2");
        assert_eq!(config.introspect_api_version, "4");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.introspect_url(), "https://iam.example.com/authorize/oauth2/introspect");
        assert_eq!(config.assertion_audience(), "https://iam.example.com/oauth2/access_token");
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(IamConfig::from_json_str(r#"{"iam_url": "ftp://iam"}"#).is_err());
        assert!(IamConfig::from_json_str(r#"{"iam_url": "https://iam", "request_timeout_secs": 0}"#).is_err());
        assert!(IamConfig::from_json_str(r#"{}"#).is_err());
        assert!(
            IamConfig::from_json_str(r#"{"iam_url": "https://iam", "safety_margin_secs": 18446744073709551615}"#)
                .is_err()
        );
        assert!(IamConfig::from_json_str(r#"{"iam_url": "https://iam", "safety_margin_secs": 86401}"#).is_err());
        assert!(IamConfig::from_json_str(r#"{"iam_url": "https://iam", "safety_margin_secs": 86400}"#).is_ok());
    }

    #[test]
    fn safety_margin_never_goes_negative() {
        let mut config = IamConfig::new("https://iam.example.com");
        assert_eq!(config.safety_margin(), TimeDelta::seconds(60));
        config.safety_margin_secs = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.safety_margin(), TimeDelta::seconds(MAX_SAFETY_MARGIN_SECS as i64));

        let huge = IamConfig::from_lookup(|k| match k {
            ENV_IAM_URL => Some("https://iam".to_string()),
            ENV_SAFETY_MARGIN => Some(u64::MAX.to_string()),
            _ => None,
        });
        assert!(matches!(huge, Err(IamError::Config(_))));
    }

    #[test]
    fn env_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_IAM_URL, "https://iam.example.com"),
            (ENV_SAFETY_MARGIN, "90"),
        ]);
        let config = IamConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.safety_margin_secs, 90);
        assert_eq!(config.request_timeout_secs, 30);

        let missing = IamConfig::from_lookup(|_| None).unwrap_err();
        assert_eq!(missing.code(), "invalid_config");

        let bad = IamConfig::from_lookup(|k| match k {
            ENV_IAM_URL => Some("https://iam".to_string()),
            ENV_TIMEOUT => Some("soon".to_string()),
            _ => None,
        });
        assert!(bad.is_err());
    }
}
