//! Engine configuration loaded from YAML, with environment overrides and validation.
//!
//! The configuration is an explicitly constructed object handed to
//! [`ProtectionEngine::new`](crate::engine::ProtectionEngine::new). Rotating the
//! service host or credentials means building a new engine from a refreshed
//! config; engines keep no state between calls.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{ProtectionError, Result};
use crate::secrets::ServiceSecrets;

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "PROTECTION_CONFIG";
/// Environment variable overriding the service host.
pub const HOST_ENV: &str = "PROTECTION_SERVICE_HOST";
/// Environment variable toggling insecure TLS ("true"/"1").
pub const INSECURE_TLS_ENV: &str = "PROTECTION_ACCEPT_INVALID_CERTS";

// ---------------------------------------------------------------------------
// ProtectionConfig
// ---------------------------------------------------------------------------

/// Root configuration loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub service: ServiceConfig,
    pub retry: RetryConfig,
    pub batching: BatchingConfig,
    pub traversal: TraversalConfig,
    pub registry: RegistryConfig,
}

/// Tokenization service endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://protect.internal:8443`. May come from a secret source instead.
    pub host: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub tls: TlsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: None,
            connect_timeout_ms: 2_000,
            request_timeout_ms: 10_000,
            tls: TlsConfig::default(),
        }
    }
}

/// TLS verification settings. Verification is on unless explicitly disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Skip certificate verification. Insecure; logged loudly when enabled.
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per protected call (first try included)
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Maximum request items per service call
    pub batch_size: usize,
    /// Batches in flight at once during one detokenize call
    pub max_concurrency: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Deepest nesting accepted before failing with `StructureTooDeep`
    pub max_depth: usize,
    pub unresolved_markers: UnresolvedMarkerPolicy,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            unresolved_markers: UnresolvedMarkerPolicy::default(),
        }
    }
}

/// What to do with a marker the service never returned a value for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedMarkerPolicy {
    /// Leave the literal marker in the output and log a warning
    #[default]
    Leave,
    /// Fail the call with `UnresolvedMarkers`
    Error,
}

/// Tokenizable fields and recognised policy names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// field name → policy name
    pub fields: BTreeMap<String, String>,
    pub policies: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let fields = [
            ("dob", "DOB"),
            ("firstNm", "firstName"),
            ("lastNm", "lastName"),
            ("ssn", "SSN"),
        ]
        .into_iter()
        .map(|(field, policy)| (field.to_string(), policy.to_string()))
        .collect();

        let policies = ["firstName", "lastName", "DOB", "SSN", "OtherID"]
            .into_iter()
            .map(String::from)
            .collect();

        Self { fields, policies }
    }
}

impl ProtectionConfig {
    /// Parse from YAML text.
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).context("Parsing protection config")
    }

    /// Load from a YAML file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    /// Load from `PROTECTION_CONFIG` when set (defaults otherwise), then apply
    /// environment overrides. A `.env` file is honoured.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            self.service.host = Some(host);
        }
        if let Some(flag) = lookup(INSECURE_TLS_ENV) {
            self.service.tls.accept_invalid_certs =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Fill the host from resolved secrets unless one is already configured.
    pub fn apply_secrets(&mut self, secrets: &ServiceSecrets) {
        if self.service.host.is_none() {
            self.service.host = Some(secrets.protection_service_host.clone());
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.service.host = Some(host.into());
        self
    }

    /// Validated base URL of the service, without trailing slash.
    pub fn host(&self) -> Result<&str> {
        let host = self
            .service
            .host
            .as_deref()
            .map(|h| h.trim().trim_end_matches('/'))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProtectionError::Config("service host is not configured".into()))?;

        let url = url::Url::parse(host)
            .map_err(|e| ProtectionError::Config(format!("invalid service host '{}': {}", host, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ProtectionError::Config(format!(
                "service host must be http(s), got scheme '{}'",
                url.scheme()
            )));
        }
        Ok(host)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.service.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.service.request_timeout_ms)
    }

    /// Check the host and every bound the engine relies on.
    pub fn validate(&self) -> Result<()> {
        self.host()?;
        self.validate_limits()
    }

    /// Check everything except the host (gateways other than HTTP need none).
    pub fn validate_limits(&self) -> Result<()> {
        let checks: [(bool, &str); 6] = [
            (self.service.connect_timeout_ms > 0, "service.connect_timeout_ms must be > 0"),
            (self.service.request_timeout_ms > 0, "service.request_timeout_ms must be > 0"),
            (self.retry.max_attempts > 0, "retry.max_attempts must be > 0"),
            (self.batching.batch_size > 0, "batching.batch_size must be > 0"),
            (self.batching.max_concurrency > 0, "batching.max_concurrency must be > 0"),
            (self.traversal.max_depth > 0, "traversal.max_depth must be > 0"),
        ];
        if let Some((_, message)) = checks.iter().find(|(ok, _)| !ok) {
            return Err(ProtectionError::Config(message.to_string()));
        }

        for (field, policy) in &self.registry.fields {
            if !self.registry.policies.contains(policy) {
                return Err(ProtectionError::Config(format!(
                    "registry field '{}' maps to unknown policy '{}'",
                    field, policy
                )));
            }
        }
        Ok(())
    }
}
