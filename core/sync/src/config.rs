//! Connector configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use syncbridge_common::{Error, Result};

use crate::retry::RetryConfig;

/// Default backend used when no configuration file is present.
const DEFAULT_BACKEND_URL: &str = "http://localhost:6060/";

/// Path of the token exchange endpoint, relative to the backend URL.
pub const TOKEN_ENDPOINT: &str = "api/auth/token";
/// Path of the mutation endpoint, relative to the backend URL.
pub const DATA_ENDPOINT: &str = "api/data";

/// Configuration shared by the credential provider, the upload pump and the
/// upload scheduler.
///
/// Durations are stored as milliseconds so configuration files stay flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backend base URL hosting `/api/auth/token` and `/api/data`.
    pub backend_url: Url,
    /// Bound on a single background credential refresh.
    pub refresh_timeout_ms: u64,
    /// Bound on a single remote call.
    pub request_timeout_ms: u64,
    /// In-call retries per operation before the drain is deferred.
    pub max_retries: u32,
    /// First in-call retry delay.
    pub retry_initial_delay_ms: u64,
    /// Cap on in-call retry delays.
    pub retry_max_delay_ms: u64,
    /// Growth factor of in-call retry delays and of the backoff window.
    pub retry_backoff_multiplier: f64,
    /// Cap on the pump's backoff window between deferred drains.
    pub max_backoff_ms: u64,
    /// Add +/- 25% jitter to retry and backoff delays.
    pub jitter: bool,
    /// Give up on a transaction after this many deferred drains.
    /// `None` keeps retrying transient failures indefinitely.
    pub abandon_after_deferrals: Option<u32>,
    /// Period of the upload scheduler.
    pub upload_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_url: Url::parse(DEFAULT_BACKEND_URL).expect("default backend URL is valid"),
            refresh_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_retries: 3,
            retry_initial_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            retry_backoff_multiplier: 2.0,
            max_backoff_ms: 300_000,
            jitter: true,
            abandon_after_deferrals: None,
            upload_interval_ms: 10_000,
        }
    }
}

impl SyncConfig {
    /// Create a configuration for the given backend with default tuning.
    pub fn new(backend_url: Url) -> Self {
        Self {
            backend_url,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// - File does not exist or cannot be read
    /// - File is not valid JSON
    /// - Configuration fails validation
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "Configuration file {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Invalid configuration {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the connector cannot work with.
    pub fn validate(&self) -> Result<()> {
        match self.backend_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::Config(format!(
                    "Backend URL must use http or https, got {}",
                    other
                )))
            }
        }
        if self.refresh_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(Error::Config("Timeouts must be greater than zero".to_string()));
        }
        if self.upload_interval_ms == 0 {
            return Err(Error::Config(
                "Upload interval must be greater than zero".to_string(),
            ));
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "retry_backoff_multiplier must be at least 1.0, got {}",
                self.retry_backoff_multiplier
            )));
        }
        if self.abandon_after_deferrals == Some(0) {
            return Err(Error::Config(
                "abandon_after_deferrals must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve an endpoint path against the backend URL.
    ///
    /// The backend URL is treated as a directory even without a trailing
    /// slash, so `https://host/sync` + `api/data` is `https://host/sync/api/data`.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.backend_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path)
            .map_err(|e| Error::Config(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Token exchange endpoint.
    pub fn token_url(&self) -> Result<Url> {
        self.endpoint(TOKEN_ENDPOINT)
    }

    /// Mutation endpoint.
    pub fn data_url(&self) -> Result<Url> {
        self.endpoint(DATA_ENDPOINT)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn upload_interval(&self) -> Duration {
        Duration::from_millis(self.upload_interval_ms)
    }

    /// Retry policy for a single operation within one drain.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_backoff_multiplier(self.retry_backoff_multiplier)
            .with_jitter(self.jitter)
    }

    /// Backoff policy between drains after a transaction was deferred.
    pub fn deferral_backoff(&self) -> RetryConfig {
        RetryConfig::new(u32::MAX)
            .with_initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_backoff_multiplier(self.retry_backoff_multiplier)
            .with_jitter(self.jitter)
    }
}
