//! Layered configuration for the coordination services.
//!
//! Sources are merged in increasing precedence: built-in defaults, an
//! optional TOML file, then environment variables prefixed `SWITCHYARD` with
//! `__` between nested keys (for example `SWITCHYARD__STORE__URL`).

use crate::breaker::domain::{BreakerDomainError, BreakerPolicies, BreakerPolicy};
use crate::coordinator::domain::{RetryBackoff, RouteScope};
use crate::coordinator::services::{
    CoordinatorSettings, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_MAX_RETRIES,
};
use crate::registry::domain::{DEFAULT_TTL_SECONDS, LivenessTtl, RegistryDomainError};
use crate::registry::services::{DEFAULT_PAGE_SIZE, RegistrySettings};
use crate::store::{DEFAULT_NAMESPACE, KeyNamespace, NamespaceError, StoreRetryPolicy};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use urlencoding::encode;

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Errors raised while loading or interpreting configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A source could not be read or deserialised.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    /// The store namespace is malformed.
    #[error("invalid store namespace: {0}")]
    Namespace(#[from] NamespaceError),

    /// A registry value is out of range.
    #[error("invalid registry configuration: {0}")]
    Registry(#[from] RegistryDomainError),

    /// A breaker policy is unusable.
    #[error("invalid breaker configuration: {0}")]
    Breaker(#[from] BreakerDomainError),
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    /// Shared store connection.
    pub store: StoreConfig,
    /// Message delivery tunables.
    pub messaging: MessagingConfig,
    /// Agent registry tunables.
    pub registry: RegistryConfig,
    /// Circuit breaker policies.
    pub breaker: BreakerConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl SwitchyardConfig {
    /// Loads defaults, then `path` when given, then the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Load`] when the file exists but cannot
    /// be parsed, or a value has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = Config::builder();
        if let Some(file) = path {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml).required(false));
        }
        let settings = builder.add_source(environment(None)).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Loads from TOML text with an explicit environment map instead of the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Load`] when the text cannot be parsed.
    pub fn from_sources(
        toml: &str,
        env: HashMap<String, String>,
    ) -> Result<Self, ConfigurationError> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(environment(Some(env)))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Builds the delivery settings.
    #[must_use]
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        self.messaging.settings(self.store.retry.policy())
    }

    /// Builds the registry settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Registry`] when the default TTL is zero.
    pub fn registry_settings(&self) -> Result<RegistrySettings, ConfigurationError> {
        Ok(self.registry.settings(self.store.retry.policy())?)
    }

    /// Builds the breaker policy set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Breaker`] when any policy is invalid.
    pub fn breaker_policies(&self) -> Result<BreakerPolicies, ConfigurationError> {
        Ok(self.breaker.policies()?)
    }
}

fn environment(source: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .source(source)
}

/// Shared store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `PostgreSQL` URL. Without one only the in-memory adapters are usable.
    pub url: Option<String>,
    /// User name merged into `url` when it carries none.
    pub username: Option<String>,
    /// Password merged into `url` alongside `username`.
    pub password: Option<String>,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// Deployment prefix for every persisted record.
    pub namespace: String,
    /// Transient-fault retry.
    pub retry: StoreRetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            pool_size: 10,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            retry: StoreRetryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Returns the validated namespace.
    ///
    /// # Errors
    ///
    /// Returns [`NamespaceError`] when the configured value is malformed.
    pub fn namespace(&self) -> Result<KeyNamespace, NamespaceError> {
        KeyNamespace::new(self.namespace.as_str())
    }

    /// Returns the connection URL with credentials merged in, if a URL is
    /// configured.
    ///
    /// Credentials already present in the URL win over the separate fields.
    #[must_use]
    pub fn connection_url(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        let Some(user) = self.username.as_deref() else {
            return Some(url.to_owned());
        };
        let Some((scheme, rest)) = url.split_once("://") else {
            return Some(url.to_owned());
        };
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if authority.contains('@') {
            return Some(url.to_owned());
        }
        let credentials = match self.password.as_deref() {
            Some(password) => format!("{}:{}", encode(user), encode(password)),
            None => encode(user).into_owned(),
        };
        Some(format!("{scheme}://{credentials}@{rest}"))
    }
}

/// Store retry pacing, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRetryConfig {
    /// Attempts per store call, including the first.
    pub max_attempts: u32,
    /// Pause after the first failed attempt.
    pub base_delay_ms: u64,
    /// Pause ceiling.
    pub max_delay_ms: u64,
    /// Per-attempt timeout.
    pub attempt_timeout_ms: u64,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
            attempt_timeout_ms: 5_000,
        }
    }
}

impl StoreRetryConfig {
    /// Builds the retry policy.
    #[must_use]
    pub const fn policy(&self) -> StoreRetryPolicy {
        StoreRetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            Duration::from_millis(self.attempt_timeout_ms),
        )
    }
}

/// Message delivery tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Largest accepted payload in bytes.
    pub max_payload_bytes: usize,
    /// Retries used when a sender does not choose.
    pub default_max_retries: u32,
    /// Upper bound on sender-chosen retries.
    pub max_retries_ceiling: u32,
    /// Largest batch one receive may lease.
    pub max_batch_size: usize,
    /// Lease length used when a receiver does not choose.
    pub default_lease_secs: u64,
    /// First redelivery delay.
    pub backoff_base_ms: u64,
    /// Redelivery delay ceiling.
    pub backoff_max_ms: u64,
    /// Circuit granularity.
    pub route_scope: RouteScope,
    /// Dead-letter retention; unset keeps them indefinitely.
    pub dead_letter_retention_secs: Option<u64>,
    /// Age at which delivered and dead-lettered messages are deleted; unset
    /// keeps them indefinitely.
    pub settled_retention_secs: Option<u64>,
    /// Pause between lease-expiry sweeps.
    pub sweep_interval_ms: u64,
    /// Lapsed leases handled per sweep.
    pub sweep_batch_size: usize,
    /// Dead letters returned per listing.
    pub dead_letter_page_size: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        let defaults = CoordinatorSettings::default();
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            default_max_retries: DEFAULT_MAX_RETRIES,
            max_retries_ceiling: defaults.max_retries_ceiling,
            max_batch_size: defaults.max_batch_size,
            default_lease_secs: defaults.default_lease.as_secs(),
            backoff_base_ms: millis(defaults.backoff.base()),
            backoff_max_ms: millis(defaults.backoff.max()),
            route_scope: defaults.route_scope,
            dead_letter_retention_secs: None,
            settled_retention_secs: defaults.settled_retention.map(|age| age.as_secs()),
            sweep_interval_ms: 5_000,
            sweep_batch_size: defaults.sweep_batch_size,
            dead_letter_page_size: defaults.dead_letter_page_size,
        }
    }
}

impl MessagingConfig {
    /// Builds the redelivery backoff.
    #[must_use]
    pub const fn backoff(&self) -> RetryBackoff {
        RetryBackoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    /// Returns the pause between lease-expiry sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Builds the coordinator settings using `retry` for store calls.
    #[must_use]
    pub fn settings(&self, retry: StoreRetryPolicy) -> CoordinatorSettings {
        CoordinatorSettings {
            max_payload_bytes: self.max_payload_bytes,
            default_max_retries: self.default_max_retries.min(self.max_retries_ceiling),
            max_retries_ceiling: self.max_retries_ceiling,
            max_batch_size: self.max_batch_size,
            default_lease: Duration::from_secs(self.default_lease_secs.max(1)),
            backoff: self.backoff(),
            route_scope: self.route_scope,
            dead_letter_retention: self.dead_letter_retention_secs.map(Duration::from_secs),
            settled_retention: self.settled_retention_secs.map(Duration::from_secs),
            sweep_batch_size: self.sweep_batch_size.max(1),
            dead_letter_page_size: self.dead_letter_page_size.max(1),
            retry,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Agent registry tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// TTL applied when a heartbeat registers an unknown agent.
    pub default_ttl_secs: u32,
    /// Registrations fetched per listing page.
    pub page_size: usize,
    /// Registrations expired per reaping pass.
    pub reap_batch_size: usize,
    /// Pause between reaping passes.
    pub reap_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECONDS,
            page_size: DEFAULT_PAGE_SIZE,
            reap_batch_size: 500,
            reap_interval_ms: 10_000,
        }
    }
}

impl RegistryConfig {
    /// Builds the registry settings using `retry` for store calls.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryDomainError::ZeroTtl`] when the default TTL is zero.
    pub fn settings(&self, retry: StoreRetryPolicy) -> Result<RegistrySettings, RegistryDomainError> {
        Ok(RegistrySettings {
            default_ttl: LivenessTtl::from_secs(self.default_ttl_secs)?,
            page_size: self.page_size.max(1),
            reap_batch_size: self.reap_batch_size.max(1),
            retry,
        })
    }

    /// Returns the pause between reaping passes.
    #[must_use]
    pub const fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

/// Breaker policy for one subject, keyed by its storage key
/// (`agent:<type>/<instance>` or `route:<type>/<instance>-><type>/<instance>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerOverride {
    /// Subject key.
    pub subject: String,
    /// Policy applied to the subject.
    #[serde(default)]
    pub policy: BreakerPolicy,
}

/// Circuit breaker policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Policy for subjects without an override.
    pub default: BreakerPolicy,
    /// Per-subject policies.
    pub overrides: Vec<BreakerOverride>,
}

impl BreakerConfig {
    /// Builds the validated policy set.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerDomainError`] when the default or any override is
    /// invalid.
    pub fn policies(&self) -> Result<BreakerPolicies, BreakerDomainError> {
        self.overrides.iter().try_fold(
            BreakerPolicies::new(self.default)?,
            |policies, entry| policies.with_key_override(entry.subject.as_str(), entry.policy),
        )
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Include the event target in each line.
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            format: LogFormat::default(),
            with_target: true,
        }
    }
}
