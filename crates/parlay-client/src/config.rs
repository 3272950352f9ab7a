//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so tests and local development work with no
//! environment at all.

use std::str::FromStr;
use std::time::Duration;

use parlay_media::UploadConfig;
use parlay_shared::constants::{
    DEFAULT_AUDIO_BUCKET, DEFAULT_IMAGE_BUCKET, DEFAULT_PENDING_MAX_POLLS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_UPLOAD_TIMEOUT_MS,
    DEFAULT_VERIFY_ATTEMPTS, DEFAULT_VERIFY_DELAY_MS,
};

use crate::sync::SyncConfig;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST and storage API.
    /// Env: `PARLAY_API_URL`
    /// Default: `http://localhost:54321`
    pub api_url: String,

    /// Project API key sent as `apikey` on every request.
    /// Env: `PARLAY_API_KEY`
    pub api_key: String,

    /// Bearer token of the signed-in user. Falls back to the API key.
    /// Env: `PARLAY_ACCESS_TOKEN`
    pub access_token: Option<String>,

    /// Env: `PARLAY_POLL_INTERVAL_MS`
    pub poll_interval: Duration,

    /// Timeout for message inserts and conversation fetches.
    /// Env: `PARLAY_REQUEST_TIMEOUT_MS`
    pub request_timeout: Duration,

    /// Env: `PARLAY_UPLOAD_TIMEOUT_MS`
    pub upload_timeout: Duration,

    /// Env: `PARLAY_VERIFY_ATTEMPTS`
    pub verify_attempts: u32,

    /// Env: `PARLAY_VERIFY_DELAY_MS`
    pub verify_delay: Duration,

    /// Env: `PARLAY_AUDIO_BUCKET`
    pub audio_bucket: String,

    /// Env: `PARLAY_IMAGE_BUCKET`
    pub image_bucket: String,

    /// Successful polls a sent message may go unconfirmed before it is
    /// shown as failed.
    /// Env: `PARLAY_PENDING_MAX_POLLS`
    pub pending_max_polls: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            access_token: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            upload_timeout: Duration::from_millis(DEFAULT_UPLOAD_TIMEOUT_MS),
            verify_attempts: DEFAULT_VERIFY_ATTEMPTS,
            verify_delay: Duration::from_millis(DEFAULT_VERIFY_DELAY_MS),
            audio_bucket: DEFAULT_AUDIO_BUCKET.to_string(),
            image_bucket: DEFAULT_IMAGE_BUCKET.to_string(),
            pending_max_polls: DEFAULT_PENDING_MAX_POLLS,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLAY_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(key) = lookup("PARLAY_API_KEY") {
            config.api_key = key;
        }

        if let Some(token) = lookup("PARLAY_ACCESS_TOKEN") {
            if !token.is_empty() {
                config.access_token = Some(token);
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PARLAY_POLL_INTERVAL_MS") {
            if ms == 0 {
                tracing::warn!("PARLAY_POLL_INTERVAL_MS must be positive, using default");
            } else {
                config.poll_interval = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PARLAY_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PARLAY_UPLOAD_TIMEOUT_MS") {
            config.upload_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<u32>(&lookup, "PARLAY_VERIFY_ATTEMPTS") {
            config.verify_attempts = n.max(1);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PARLAY_VERIFY_DELAY_MS") {
            config.verify_delay = Duration::from_millis(ms);
        }

        if let Some(bucket) = lookup("PARLAY_AUDIO_BUCKET") {
            config.audio_bucket = bucket;
        }

        if let Some(bucket) = lookup("PARLAY_IMAGE_BUCKET") {
            config.image_bucket = bucket;
        }

        if let Some(n) = parse_var::<u32>(&lookup, "PARLAY_PENDING_MAX_POLLS") {
            config.pending_max_polls = n.max(1);
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter in the binary.

        config
    }

    /// Token for the `Authorization` header.
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: self.poll_interval,
            fetch_timeout: self.request_timeout,
            pending_max_polls: self.pending_max_polls,
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            audio_bucket: self.audio_bucket.clone(),
            image_bucket: self.image_bucket.clone(),
            upload_timeout: self.upload_timeout,
            verify_attempts: self.verify_attempts,
            verify_delay: self.verify_delay,
            ..UploadConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(value = %raw, "Invalid {name}, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
        assert_eq!(config.verify_attempts, 3);
        assert_eq!(config.verify_delay, Duration::from_secs(1));
        assert_eq!(config.pending_max_polls, 5);
        assert_eq!(config.bearer_token(), "");
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PARLAY_API_URL", "https://api.example.com/"),
            ("PARLAY_API_KEY", "anon"),
            ("PARLAY_ACCESS_TOKEN", "jwt"),
            ("PARLAY_POLL_INTERVAL_MS", "1000"),
            ("PARLAY_VERIFY_ATTEMPTS", "5"),
            ("PARLAY_AUDIO_BUCKET", "voice"),
        ]);
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.bearer_token(), "jwt");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.upload_config().verify_attempts, 5);
        assert_eq!(config.upload_config().audio_bucket, "voice");
        assert_eq!(config.sync_config().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PARLAY_POLL_INTERVAL_MS", "soon"),
            ("PARLAY_PENDING_MAX_POLLS", "-1"),
            ("PARLAY_ACCESS_TOKEN", ""),
        ]);
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
        assert_eq!(config.pending_max_polls, 5);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = from_pairs(&[("PARLAY_POLL_INTERVAL_MS", "0")]);
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
    }
}
