//! Secret bootstrap seam.
//!
//! The engine only needs a resolved service host before its first call. Where
//! that comes from (environment, a secret-store document) is behind
//! [`SecretSource`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ProtectionError, Result};

/// Environment variable read by [`EnvSecretSource`].
pub const SECRET_HOST_ENV: &str = "PROTECTION_SECRET_HOST";

/// Values resolved from the secret store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSecrets {
    #[serde(rename = "protectionServiceHost")]
    pub protection_service_host: String,
}

/// Supplies [`ServiceSecrets`] at process start
pub trait SecretSource: Send + Sync {
    fn load(&self) -> Result<ServiceSecrets>;

    /// Name used in logs
    fn describe(&self) -> String;
}

/// Reads the host from the process environment (`.env` honoured).
#[derive(Debug, Clone)]
pub struct EnvSecretSource {
    var: String,
}

impl EnvSecretSource {
    pub fn new() -> Self {
        Self {
            var: SECRET_HOST_ENV.to_string(),
        }
    }

    pub fn with_var(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvSecretSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretSource for EnvSecretSource {
    fn load(&self) -> Result<ServiceSecrets> {
        dotenvy::dotenv().ok();
        let host = std::env::var(&self.var).map_err(|_| {
            ProtectionError::Config(format!("{} environment variable not set", self.var))
        })?;
        Ok(ServiceSecrets {
            protection_service_host: host,
        })
    }

    fn describe(&self) -> String {
        format!("env:{}", self.var)
    }
}

/// Parses a JSON secret document, e.g. the `SecretString` of a managed secret:
///
/// ```json
/// {"protectionServiceHost": "https://protect.internal:8443"}
/// ```
#[derive(Debug, Clone)]
pub enum JsonSecretSource {
    Inline(String),
    File(PathBuf),
}

impl JsonSecretSource {
    pub fn inline(document: impl Into<String>) -> Self {
        Self::Inline(document.into())
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    fn parse(document: &str, origin: &str) -> Result<ServiceSecrets> {
        let secrets: ServiceSecrets = serde_json::from_str(document).map_err(|e| {
            ProtectionError::Config(format!("secret document {} is invalid: {}", origin, e))
        })?;
        if secrets.protection_service_host.trim().is_empty() {
            return Err(ProtectionError::Config(format!(
                "secret document {} has an empty protectionServiceHost",
                origin
            )));
        }
        Ok(secrets)
    }
}

impl SecretSource for JsonSecretSource {
    fn load(&self) -> Result<ServiceSecrets> {
        match self {
            Self::Inline(document) => Self::parse(document, "<inline>"),
            Self::File(path) => {
                let document = std::fs::read_to_string(path).map_err(|e| {
                    ProtectionError::Config(format!(
                        "secret {} was not found: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::parse(&document, &path.display().to_string())
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Inline(_) => "json:<inline>".to_string(),
            Self::File(path) => format!("json:{}", path.display()),
        }
    }
}
