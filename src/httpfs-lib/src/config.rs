use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost/";
/// HTML listings are dropped from the cache this long after they were fetched.
pub const DEFAULT_LISTING_CACHE_TTL: Duration = Duration::from_secs(30);
/// A read miss fetches this many times the requested length.
pub const DEFAULT_PREFETCH_MULTIPLIER: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpFsConfig {
    #[serde(alias = "http_addr", alias = "addr")]
    pub base_url: String,
    /// `user:pass`, empty disables basic auth.
    #[serde(alias = "http_auth")]
    pub auth: String,
    #[serde(alias = "http_insecure_skip_verify")]
    pub insecure_skip_verify: bool,
    #[serde(alias = "json")]
    pub accept_json: bool,
    #[serde(rename = "listing_cache_ttl_secs", deserialize_with = "de_secs")]
    pub listing_cache_ttl: Duration,
    pub prefetch_multiplier: u64,
    #[serde(rename = "request_timeout_secs", deserialize_with = "de_secs")]
    pub request_timeout: Duration,
}

impl Default for HttpFsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: String::new(),
            insecure_skip_verify: true,
            accept_json: false,
            listing_cache_ttl: DEFAULT_LISTING_CACHE_TTL,
            prefetch_multiplier: DEFAULT_PREFETCH_MULTIPLIER,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl HttpFsConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Username and password from `auth`, split at the first `:`.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        parse_basic_auth(&self.auth)
    }

    pub fn prefetch_multiplier(&self) -> u64 {
        self.prefetch_multiplier.max(1)
    }
}

pub fn parse_basic_auth(auth: &str) -> Option<(String, String)> {
    if auth.is_empty() {
        return None;
    }
    match auth.split_once(':') {
        Some((user, pass)) => Some((user.to_string(), pass.to_string())),
        None => Some((auth.to_string(), String::new())),
    }
}

fn de_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "duration must be a non-negative number of seconds, got {}",
            secs
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_auth() {
        assert_eq!(parse_basic_auth(""), None);
        assert_eq!(
            parse_basic_auth("alice:secret"),
            Some(("alice".to_string(), "secret".to_string()))
        );
        assert_eq!(
            parse_basic_auth("alice"),
            Some(("alice".to_string(), String::new()))
        );
        assert_eq!(
            parse_basic_auth("alice:se:cret"),
            Some(("alice".to_string(), "se:cret".to_string()))
        );
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: HttpFsConfig = serde_json::from_value(serde_json::json!({
            "base_url": "https://files.example.org/pub",
            "json": true,
            "listing_cache_ttl_secs": 0.5
        }))
        .unwrap();
        assert_eq!(config.base_url, "https://files.example.org/pub");
        assert!(config.accept_json);
        assert!(config.insecure_skip_verify);
        assert_eq!(config.listing_cache_ttl, Duration::from_millis(500));
        assert_eq!(config.prefetch_multiplier, DEFAULT_PREFETCH_MULTIPLIER);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_config_rejects_negative_duration() {
        let result: Result<HttpFsConfig, _> = serde_json::from_value(serde_json::json!({
            "request_timeout_secs": -1
        }));
        assert!(result.is_err());
    }
}
