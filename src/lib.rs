//! Data protection engine.
//!
//! Sits between application code and an external tokenization service:
//!
//! - **tokenize**: turns a flat set of sensitive field values into tokens with
//!   one `protectList` call
//! - **detokenize**: finds every `value$$Policy` leaf and policy-tagged list in
//!   an arbitrary JSON record, resolves them in batches through
//!   `unprotectList`, and returns a clean copy of the record
//!
//! ```ignore
//! let config = ProtectionConfig::from_env()?;
//! let engine = ProtectionEngine::new(config)?;
//! let clean = engine.detokenize(&records).await?;
//! ```

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod retry;
pub mod secrets;
pub mod splice;
pub mod tokenize;
pub mod traversal;
pub mod validator;

pub use config::{ProtectionConfig, UnresolvedMarkerPolicy};
pub use engine::ProtectionEngine;
pub use error::{GatewayError, ProtectionError, Result};
pub use gateway::{HttpGateway, ProtectionGateway};
pub use registry::PolicyRegistry;
pub use retry::CallContext;
pub use secrets::{EnvSecretSource, JsonSecretSource, SecretSource, ServiceSecrets};
pub use tokenize::FieldValue;

pub use protection_types::{
    DetokenizeItem, Operation, ResultItem, TokenValue, TokenizeItem, TokenizedFields,
};
