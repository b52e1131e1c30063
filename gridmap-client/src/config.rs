//! Session configuration and builder.

use std::path::PathBuf;
use std::time::Duration;

use gridmap_core::{Format, GridError, Result};

/// Default server endpoint.
const DEFAULT_ADDRESS: &str = "127.0.0.1:1408";
/// Default per-call deadline.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Environment variable overriding the TLS default.
const TLS_ENABLED_ENV: &str = "TLS_ENABLED";

/// Configuration for a GridMap session.
///
/// Use [`SessionConfig::builder`] to construct one:
///
/// ```rust
/// use gridmap_client::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::builder()
///     .address("cache.internal:1408")
///     .request_timeout(Duration::from_secs(10))
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    address: String,
    scope: String,
    request_timeout: Duration,
    tls_enabled: bool,
    ca_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    format: Format,
}

impl SessionConfig {
    /// Creates a new builder.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Returns the server endpoint as `host:port`.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the scope name caches are resolved in.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the per-call deadline.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns `true` if the connection uses TLS.
    pub fn tls_enabled(&self) -> bool {
        self.tls_enabled
    }

    /// Returns the CA certificate path, if configured.
    pub fn ca_cert_path(&self) -> Option<&PathBuf> {
        self.ca_cert_path.as_ref()
    }

    /// Returns the client certificate path, if configured.
    pub fn client_cert_path(&self) -> Option<&PathBuf> {
        self.client_cert_path.as_ref()
    }

    /// Returns the client key path, if configured.
    pub fn client_key_path(&self) -> Option<&PathBuf> {
        self.client_key_path.as_ref()
    }

    /// Returns the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfigBuilder::new()
            .build()
            .expect("default config is valid")
    }
}

/// Returns `true` when the given environment value enables TLS.
fn is_truthy(value: &str) -> bool {
    matches!(value, "true" | "1")
}

/// Builder for [`SessionConfig`].
///
/// When `tls_enabled` is not set explicitly, the `TLS_ENABLED` environment
/// variable supplies the default (truthy values are `"true"` and `"1"`).
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    address: Option<String>,
    scope: Option<String>,
    request_timeout: Option<Duration>,
    tls_enabled: Option<bool>,
    ca_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    format: Option<String>,
}

impl SessionConfigBuilder {
    /// Creates a new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server endpoint (`host:port`).
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the scope caches are resolved in.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the per-call deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Enables or disables TLS explicitly, overriding the environment.
    pub fn tls_enabled(mut self, enabled: bool) -> Self {
        self.tls_enabled = Some(enabled);
        self
    }

    /// Sets the CA certificate path.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Sets the client certificate and key paths for mutual TLS.
    pub fn client_auth(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Sets the serialization format by name, such as `"json"`.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Builds the configuration, validating TLS and format settings.
    pub fn build(self) -> Result<SessionConfig> {
        let tls_enabled = self.tls_enabled.unwrap_or_else(|| {
            std::env::var(TLS_ENABLED_ENV)
                .map(|v| is_truthy(&v))
                .unwrap_or(false)
        });

        if tls_enabled && self.ca_cert_path.is_none() {
            return Err(GridError::Configuration(
                "TLS is enabled but no CA certificate path is configured".to_string(),
            ));
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(GridError::Configuration(
                "client certificate and key paths must be configured together".to_string(),
            ));
        }

        let format = match self.format.as_deref() {
            None => Format::default(),
            Some(name) => Format::from_name(name).ok_or_else(|| {
                GridError::Configuration(format!("unknown serialization format {:?}", name))
            })?,
        };

        Ok(SessionConfig {
            address: self.address.unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            scope: self.scope.unwrap_or_default(),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            tls_enabled,
            ca_cert_path: self.ca_cert_path,
            client_cert_path: self.client_cert_path,
            client_key_path: self.client_key_path,
            format,
        })
    }
}
