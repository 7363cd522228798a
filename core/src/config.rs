//! Client configuration.
//!
//! The base URL is read once when the client is built; everything the
//! dispatcher sends is resolved against it.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

const ENV_BASE_URL: &str = "AUTHFETCH_BASE_URL";
const ENV_REFRESH_PATH: &str = "AUTHFETCH_REFRESH_PATH";
const ENV_RENEWAL_TIMEOUT_MS: &str = "AUTHFETCH_RENEWAL_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: String,
    refresh_path: String,
    /// Upper bound on a single renewal call. `None` waits indefinitely.
    renewal_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            renewal_timeout: None,
        })
    }

    /// Load from `AUTHFETCH_BASE_URL`, `AUTHFETCH_REFRESH_PATH` and
    /// `AUTHFETCH_RENEWAL_TIMEOUT_MS`. Only the base URL is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var(ENV_BASE_URL).map_err(|_| ConfigError::MissingVar(ENV_BASE_URL))?;
        let mut config = Self::new(&base_url)?;
        if let Ok(path) = std::env::var(ENV_REFRESH_PATH) {
            config = config.with_refresh_path(&path);
        }
        if let Ok(raw) = std::env::var(ENV_RENEWAL_TIMEOUT_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_RENEWAL_TIMEOUT_MS,
                value: raw.clone(),
            })?;
            config = config.with_renewal_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }

    pub fn with_refresh_path(mut self, path: &str) -> Self {
        self.refresh_path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn with_renewal_timeout(mut self, timeout: Duration) -> Self {
        self.renewal_timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn renewal_timeout(&self) -> Option<Duration> {
        self.renewal_timeout
    }

    pub fn refresh_url(&self) -> String {
        self.resolve(&self.refresh_path)
    }

    /// Absolute URLs pass through; anything else is joined onto the base.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}
