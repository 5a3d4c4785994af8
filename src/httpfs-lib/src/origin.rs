use crate::{HttpFsConfig, HttpFsError, HttpFsResult};
use reqwest::{Client, Method, RequestBuilder};
use std::time::Duration;

/// Process-wide HTTP side of the filesystem: client, base URL and policy knobs.
/// Read-only after construction and shared by every node.
pub struct RemoteOrigin {
    client: Client,
    base_url: String,
    basic_auth: Option<(String, String)>,
    accept_json: bool,
    listing_cache_ttl: Duration,
    prefetch_multiplier: u64,
}

impl RemoteOrigin {
    pub fn new(config: &HttpFsConfig) -> HttpFsResult<Self> {
        let base_url = normalize_base_url(&config.base_url);
        reqwest::Url::parse(&base_url)
            .map_err(|e| HttpFsError::InvalidParam(format!("bad base url {}: {}", base_url, e)))?;

        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HttpFsError::Internal(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            basic_auth: config.basic_auth(),
            accept_json: config.accept_json,
            listing_cache_ttl: config.listing_cache_ttl,
            prefetch_multiplier: config.prefetch_multiplier(),
        })
    }

    /// Builds a request against `base_url + path`. This is the only place
    /// credentials are attached to outbound requests.
    pub fn new_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let req = self.client.request(method, url);
        match &self.basic_auth {
            Some((user, pass)) => req.basic_auth(user, Some(pass)),
            None => req,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn accept_json(&self) -> bool {
        self.accept_json
    }

    pub fn listing_cache_ttl(&self) -> Duration {
        self.listing_cache_ttl
    }

    pub fn prefetch_multiplier(&self) -> u64 {
        self.prefetch_multiplier
    }
}

pub fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://a.b"), "http://a.b/");
        assert_eq!(normalize_base_url("http://a.b/pub/"), "http://a.b/pub/");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = HttpFsConfig::new("not a url");
        let result = RemoteOrigin::new(&config);
        assert!(matches!(result, Err(HttpFsError::InvalidParam(_))));
    }
}
