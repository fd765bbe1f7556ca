//! Configuration for the engine.

use crate::crypto::CredentialCipher;
use crate::error::{SyncError, SyncResult};
use cookiesync_protocol::{StoredSettings, DEFAULT_LOG_CAPACITY, DEFAULT_STAT_HISTORY};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Secret used to protect the API token when none is configured.
pub const DEFAULT_CREDENTIAL_SECRET: &str = "cookie-syncer-secret-key";

/// Configuration of engine timings and limits.
#[derive(Clone)]
pub struct EngineConfig {
    /// Quiet period after which staged changes are pushed.
    pub debounce_window: Duration,
    /// Delay of the one-shot retry after a failed push.
    pub retry_delay: Duration,
    /// Delay before the first keep-alive cycle after (re)scheduling.
    pub keep_alive_initial_delay: Duration,
    /// Lower bound of the keep-alive period.
    pub min_keep_alive_period: Duration,
    /// Timeout of each silent page load.
    pub load_timeout: Duration,
    /// Timeout of each request to the remote API.
    pub http_timeout: Duration,
    /// Activity log capacity.
    pub log_capacity: usize,
    /// History entries kept per cookie in the statistics.
    pub stat_history: usize,
    /// Secret from which the token encryption key is derived.
    pub credential_secret: String,
}

impl EngineConfig {
    /// Creates a configuration with the default timings.
    pub fn new() -> Self {
        Self {
            debounce_window: Duration::from_secs(15),
            retry_delay: Duration::from_secs(5 * 60),
            keep_alive_initial_delay: Duration::from_secs(60),
            min_keep_alive_period: Duration::from_secs(60),
            load_timeout: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
            log_capacity: DEFAULT_LOG_CAPACITY,
            stat_history: DEFAULT_STAT_HISTORY,
            credential_secret: DEFAULT_CREDENTIAL_SECRET.to_string(),
        }
    }

    /// Sets the debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Sets the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the delay before the first keep-alive cycle.
    pub fn with_keep_alive_initial_delay(mut self, delay: Duration) -> Self {
        self.keep_alive_initial_delay = delay;
        self
    }

    /// Sets the minimum keep-alive period.
    pub fn with_min_keep_alive_period(mut self, period: Duration) -> Self {
        self.min_keep_alive_period = period;
        self
    }

    /// Sets the silent-load timeout.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Sets the HTTP request timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the activity log capacity.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Sets the per-cookie history capacity.
    pub fn with_stat_history(mut self, capacity: usize) -> Self {
        self.stat_history = capacity;
        self
    }

    /// Sets the credential secret.
    pub fn with_credential_secret(mut self, secret: impl Into<String>) -> Self {
        self.credential_secret = secret.into();
        self
    }

    /// Resolves the keep-alive period from stored settings.
    ///
    /// Returns the period and whether the configured value was raised to
    /// the minimum. A missing or zero frequency uses the minimum silently.
    pub fn keep_alive_period(&self, settings: &StoredSettings) -> (Duration, bool) {
        match settings.keep_alive_frequency {
            None | Some(0) => (self.min_keep_alive_period, false),
            Some(minutes) => {
                let period = Duration::from_secs(u64::from(minutes) * 60);
                if period < self.min_keep_alive_period {
                    (self.min_keep_alive_period, true)
                } else {
                    (period, false)
                }
            }
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("debounce_window", &self.debounce_window)
            .field("retry_delay", &self.retry_delay)
            .field("keep_alive_initial_delay", &self.keep_alive_initial_delay)
            .field("min_keep_alive_period", &self.min_keep_alive_period)
            .field("load_timeout", &self.load_timeout)
            .field("http_timeout", &self.http_timeout)
            .field("log_capacity", &self.log_capacity)
            .field("stat_history", &self.stat_history)
            .field("credential_secret", &"[REDACTED]")
            .finish()
    }
}

/// Parses and normalizes an API base URL so that routes join below it.
///
/// # Errors
///
/// Returns a configuration error if the URL is not absolute http(s).
pub fn parse_base_url(base: &str) -> SyncResult<Url> {
    let mut url = Url::parse(base.trim())
        .map_err(|e| SyncError::Configuration(format!("invalid API endpoint {base:?}: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SyncError::Configuration(format!(
            "API endpoint must be http or https, got {}",
            url.scheme()
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// A usable remote endpoint: validated base URL and plaintext token.
#[derive(Clone)]
pub struct Endpoint {
    base: Url,
    token: String,
}

impl Endpoint {
    /// Creates an endpoint from a base URL and a plaintext token.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is not absolute http(s) or
    /// the token is empty.
    pub fn new(base: &str, token: impl Into<String>) -> SyncResult<Self> {
        let base = parse_base_url(base)?;
        let token = token.into();
        if token.is_empty() {
            return Err(SyncError::Configuration("auth token is empty".into()));
        }
        Ok(Self { base, token })
    }

    /// Resolves stored settings into an endpoint, decrypting the token.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the endpoint or token is missing,
    /// the endpoint is invalid, or the token cannot be decrypted.
    pub fn resolve(settings: &StoredSettings, cipher: &CredentialCipher) -> SyncResult<Self> {
        let (Some(api_endpoint), Some(auth_token)) = (&settings.api_endpoint, &settings.auth_token)
        else {
            return Err(SyncError::Configuration(
                "API endpoint or auth token is not set".into(),
            ));
        };
        let token = cipher.decrypt_token(auth_token)?;
        Self::new(api_endpoint, token)
    }

    /// Returns the base URL, always ending in `/`.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Returns the plaintext token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Builds the URL of an API route relative to the base, e.g. `sync`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the route cannot be joined.
    pub fn route(&self, route: &str) -> SyncResult<Url> {
        self.base
            .join(route.trim_start_matches('/'))
            .map_err(|e| SyncError::Configuration(format!("invalid route {route}: {e}")))
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base", &self.base.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new()
            .with_debounce_window(Duration::from_secs(1))
            .with_retry_delay(Duration::from_secs(2))
            .with_log_capacity(10);

        assert_eq!(config.debounce_window, Duration::from_secs(1));
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.log_capacity, 10);
        assert_eq!(config.stat_history, 20);
        assert!(!format!("{config:?}").contains(DEFAULT_CREDENTIAL_SECRET));
    }

    #[test]
    fn default_timings() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce_window, Duration::from_secs(15));
        assert_eq!(config.retry_delay, Duration::from_secs(300));
        assert_eq!(config.load_timeout, Duration::from_secs(30));
        assert_eq!(config.log_capacity, 100);
    }

    #[test]
    fn keep_alive_period_clamps() {
        let config = EngineConfig::new().with_min_keep_alive_period(Duration::from_secs(120));
        let settings = |f| StoredSettings {
            keep_alive_frequency: f,
            ..StoredSettings::default()
        };

        assert_eq!(
            config.keep_alive_period(&settings(None)),
            (Duration::from_secs(120), false)
        );
        assert_eq!(
            config.keep_alive_period(&settings(Some(1))),
            (Duration::from_secs(120), true)
        );
        assert_eq!(
            config.keep_alive_period(&settings(Some(5))),
            (Duration::from_secs(300), false)
        );
    }

    #[test]
    fn endpoint_routes() {
        let endpoint = Endpoint::new("https://sync.example.com/api/v1", "t").unwrap();
        assert_eq!(
            endpoint.route("sync").unwrap().as_str(),
            "https://sync.example.com/api/v1/sync"
        );
        assert_eq!(
            endpoint.route("/auth/test").unwrap().as_str(),
            "https://sync.example.com/api/v1/auth/test"
        );
    }

    #[test]
    fn endpoint_rejects_bad_input() {
        assert!(Endpoint::new("not a url", "t").unwrap_err().is_configuration());
        assert!(Endpoint::new("ftp://x.com", "t").unwrap_err().is_configuration());
        assert!(Endpoint::new("https://x.com", "").unwrap_err().is_configuration());
    }

    #[test]
    fn resolve_requires_both_fields() {
        let cipher = CredentialCipher::from_secret("s").unwrap();
        let settings = StoredSettings {
            api_endpoint: Some("https://x.com".into()),
            ..StoredSettings::default()
        };
        assert!(Endpoint::resolve(&settings, &cipher)
            .unwrap_err()
            .is_configuration());

        let settings = StoredSettings {
            auth_token: Some(cipher.encrypt_token("secret-token").unwrap()),
            ..settings
        };
        let endpoint = Endpoint::resolve(&settings, &cipher).unwrap();
        assert_eq!(endpoint.token(), "secret-token");
        assert!(!format!("{endpoint:?}").contains("secret-token"));
    }
}
