//! Protocol core configuration.
//!
//! Defaults match a single-domain server that requires STARTTLS and keeps
//! federation off. Values can be overridden from `WADDLE_XMPP_*`
//! environment variables ([`CoreConfig::from_env`]) or from a TOML file
//! layered with `WADDLE_XMPP__*` overrides ([`CoreConfig::load`]).
//!
//! # Example
//!
//! ```ignore
//! let config = CoreConfig::default()
//!     .with_domain("waddle.social")
//!     .with_in_band_registration(true);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is present but unusable.
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid {
        /// Offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Settings of the stanza-processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of partitions; each session is pinned to one of them
    pub partitions: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { partitions: 4 }
    }
}

/// Server-to-server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S2sConfig {
    /// Whether outbound federation is allowed (default: false)
    pub enabled: bool,
    /// TCP connect timeout per candidate address, in milliseconds
    pub connect_timeout_ms: u64,
    /// Stream and dialback handshake timeout per candidate, in milliseconds
    pub handshake_timeout_ms: u64,
    /// Secret for dialback keys. A random one is generated when unset.
    #[serde(skip_serializing)]
    pub dialback_secret: Option<String>,
}

impl Default for S2sConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 30_000,
            dialback_secret: None,
        }
    }
}

impl S2sConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Configuration of the protocol core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Served domain (e.g., "waddle.social")
    pub domain: String,
    /// Whether a TLS context is available for STARTTLS
    pub tls_enabled: bool,
    /// Whether clients must negotiate TLS before authenticating
    pub tls_required: bool,
    /// SASL mechanisms offered, in preference order
    pub sasl_mechanisms: Vec<String>,
    /// Whether XEP-0077 in-band registration is offered before authentication
    pub in_band_registration: bool,
    /// Answer core stanzas whose handler failed with `internal-server-error`
    pub respond_on_handler_failure: bool,
    /// `xml:lang` used in error texts when the session has none
    pub default_language: String,
    pub queue: QueueConfig,
    pub s2s: S2sConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            tls_enabled: true,
            tls_required: true,
            sasl_mechanisms: vec!["SCRAM-SHA-256".to_string(), "PLAIN".to_string()],
            in_band_registration: false,
            respond_on_handler_failure: false,
            default_language: "en_US".to_string(),
            queue: QueueConfig::default(),
            s2s: S2sConfig::default(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(name, format!("not a number: {raw}"))),
        None => Ok(None),
    }
}

impl CoreConfig {
    /// Defaults overridden by `WADDLE_XMPP_*` variables: `DOMAIN`,
    /// `TLS_ENABLED`, `TLS_REQUIRED`, `SASL_MECHANISMS` (comma separated),
    /// `REGISTRATION_ENABLED`, `RESPOND_ON_HANDLER_FAILURE`,
    /// `QUEUE_PARTITIONS`, `S2S_ENABLED`, `S2S_CONNECT_TIMEOUT_MS`,
    /// `S2S_HANDSHAKE_TIMEOUT_MS` and `S2S_DIALBACK_SECRET`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(domain) = env_string("WADDLE_XMPP_DOMAIN") {
            config.domain = domain;
        }
        if let Some(enabled) = env_flag("WADDLE_XMPP_TLS_ENABLED") {
            config.tls_enabled = enabled;
        }
        if let Some(required) = env_flag("WADDLE_XMPP_TLS_REQUIRED") {
            config.tls_required = required;
        }
        if let Some(mechanisms) = env_string("WADDLE_XMPP_SASL_MECHANISMS") {
            config.sasl_mechanisms = mechanisms
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(enabled) = env_flag("WADDLE_XMPP_REGISTRATION_ENABLED") {
            config.in_band_registration = enabled;
        }
        if let Some(respond) = env_flag("WADDLE_XMPP_RESPOND_ON_HANDLER_FAILURE") {
            config.respond_on_handler_failure = respond;
        }
        if let Some(partitions) = env_number("WADDLE_XMPP_QUEUE_PARTITIONS")? {
            config.queue.partitions = partitions;
        }
        if let Some(enabled) = env_flag("WADDLE_XMPP_S2S_ENABLED") {
            config.s2s.enabled = enabled;
        }
        if let Some(ms) = env_number("WADDLE_XMPP_S2S_CONNECT_TIMEOUT_MS")? {
            config.s2s.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_number("WADDLE_XMPP_S2S_HANDSHAKE_TIMEOUT_MS")? {
            config.s2s.handshake_timeout_ms = ms;
        }
        if let Some(secret) = env_string("WADDLE_XMPP_S2S_DIALBACK_SECRET") {
            config.s2s.dialback_secret = Some(secret);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply `WADDLE_XMPP__SECTION__KEY` overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading XMPP core configuration");

        let config: CoreConfig = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("WADDLE_XMPP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::invalid("domain", "must not be empty"));
        }
        if self.queue.partitions == 0 {
            return Err(ConfigError::invalid("queue.partitions", "must be at least 1"));
        }
        Ok(())
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_tls_enabled(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    pub fn with_tls_required(mut self, required: bool) -> Self {
        self.tls_required = required;
        self
    }

    pub fn with_sasl_mechanisms<I, S>(mut self, mechanisms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sasl_mechanisms = mechanisms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_in_band_registration(mut self, enabled: bool) -> Self {
        self.in_band_registration = enabled;
        self
    }

    pub fn with_respond_on_handler_failure(mut self, respond: bool) -> Self {
        self.respond_on_handler_failure = respond;
        self
    }

    pub fn with_queue_partitions(mut self, partitions: usize) -> Self {
        self.queue.partitions = partitions;
        self
    }

    pub fn with_s2s(mut self, s2s: S2sConfig) -> Self {
        self.s2s = s2s;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.domain, "localhost");
        assert!(config.tls_required);
        assert!(!config.in_band_registration);
        assert!(!config.respond_on_handler_failure);
        assert_eq!(config.default_language, "en_US");
        assert!(!config.s2s.enabled);
        assert_eq!(config.s2s.connect_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = CoreConfig::default()
            .with_domain("waddle.social")
            .with_tls_required(false)
            .with_sasl_mechanisms(["PLAIN"])
            .with_queue_partitions(2);
        assert_eq!(config.domain, "waddle.social");
        assert!(!config.tls_required);
        assert_eq!(config.sasl_mechanisms, vec!["PLAIN".to_string()]);
        assert_eq!(config.queue.partitions, 2);
    }

    #[test]
    fn test_validate_rejects_zero_partitions() {
        let config = CoreConfig::default().with_queue_partitions(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
domain = "example.com"
in_band_registration = true

[s2s]
enabled = true
connect_timeout_ms = 500
"#
        )
        .unwrap();

        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.domain, "example.com");
        assert!(config.in_band_registration);
        assert!(config.s2s.enabled);
        assert_eq!(config.s2s.connect_timeout_ms, 500);
        assert_eq!(config.s2s.handshake_timeout_ms, 30_000);
        assert!(config.tls_required);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            CoreConfig::load("/nonexistent/waddle-xmpp-core.toml"),
            Err(ConfigError::Load(_))
        ));
    }
}
