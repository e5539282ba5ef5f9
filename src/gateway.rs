//! Request gateway: one HTTP call against the tokenization service.
//!
//! No retry logic lives here; see [`crate::retry`].

use async_trait::async_trait;
use protection_types::Operation;
use reqwest::Client;
use serde_json::Value;

use crate::config::ProtectionConfig;
use crate::error::{GatewayError, ProtectionError, Result};

/// Transport seam between the retry controller and the service.
#[async_trait]
pub trait ProtectionGateway: Send + Sync {
    /// Issue exactly one call carrying `payload`.
    ///
    /// `Ok(None)` means the service answered without a usable body (empty body,
    /// `null`, or a non-success status); the validator treats it as a retry signal.
    async fn send(
        &self,
        operation: Operation,
        payload: &[Value],
    ) -> std::result::Result<Option<Vec<Value>>, GatewayError>;
}

/// reqwest-backed gateway posting JSON arrays to `{host}/protectList` and
/// `{host}/unprotectList`.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    host: String,
    insecure_tls: bool,
}

impl HttpGateway {
    pub fn new(config: &ProtectionConfig) -> Result<Self> {
        let host = config.host()?.to_string();
        let insecure_tls = config.service.tls.accept_invalid_certs;

        if insecure_tls {
            tracing::warn!(
                host = %host,
                "TLS certificate verification is DISABLED for the tokenization service; \
                 traffic carrying sensitive values can be intercepted"
            );
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .map_err(|e| ProtectionError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host,
            insecure_tls,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn uri(&self, operation: Operation) -> String {
        format!("{}/{}", self.host, operation.route())
    }
}

#[async_trait]
impl ProtectionGateway for HttpGateway {
    async fn send(
        &self,
        operation: Operation,
        payload: &[Value],
    ) -> std::result::Result<Option<Vec<Value>>, GatewayError> {
        if self.insecure_tls {
            tracing::warn!(%operation, "calling tokenization service without TLS verification");
        }

        let response = self
            .client
            .post(self.uri(operation))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_len = response.text().await.map(|body| body.len()).unwrap_or(0);
            tracing::warn!(
                %operation,
                status = status.as_u16(),
                body_len,
                "tokenization service returned an error status"
            );
            return Ok(None);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(items)) => Ok(Some(items)),
            Ok(Value::Null) => Ok(None),
            Ok(other) => Err(GatewayError::Decode(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(GatewayError::Decode(format!(
                "JSON parse error at line {} col {}: {}",
                e.line(),
                e.column(),
                e
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
