//! Errors surfaced by the protection engine.
//!
//! Transport and malformed-response faults are internal to the retry
//! controller; callers only ever see [`ProtectionError`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtectionError>;

#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("tokenization service unavailable after {attempts} attempt(s): {reason}")]
    ServiceUnavailable { attempts: u32, reason: String },

    #[error("protection call cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("record structure exceeds maximum depth of {limit}")]
    StructureTooDeep { limit: usize },

    #[error("{count} marker(s) were not resolved by the tokenization service")]
    UnresolvedMarkers { count: usize },

    #[error("configuration: {0}")]
    Config(String),
}

impl ProtectionError {
    /// HTTP-equivalent status for the outer request pipeline
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ServiceUnavailable { .. } => 503,
            Self::Cancelled { .. } => 503,
            Self::StructureTooDeep { .. } => 422,
            Self::UnresolvedMarkers { .. } => 502,
            Self::Config(_) => 500,
        }
    }

    /// True for the upstream-unavailable family (retry exhaustion, cancellation)
    pub fn is_unavailable(&self) -> bool {
        self.http_status() == 503
    }
}

/// Fault raised by a single gateway call.
///
/// Never escapes the retry controller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("undecodable response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
