//! ProtectionEngine: caller-facing tokenize / detokenize API.
//!
//! ## Detokenize pipeline
//!
//! ```text
//! record ─► mark_record ─► split_batches ─► RetryController (per batch, bounded pool)
//!                                                   │
//!        final record ◄── splice_resolved ◄─────────┘  (results in batch order)
//! ```
//!
//! Batches are dispatched concurrently up to `batching.max_concurrency` and
//! joined before splicing. Every batch must succeed; one `ServiceUnavailable`
//! fails the whole call.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use protection_types::{Operation, ResultItem, TokenizedFields};
use serde_json::{Map, Value};

use crate::batch::split_batches;
use crate::config::{ProtectionConfig, UnresolvedMarkerPolicy};
use crate::error::{ProtectionError, Result};
use crate::gateway::{HttpGateway, ProtectionGateway};
use crate::registry::PolicyRegistry;
use crate::retry::{CallContext, RetryController};
use crate::secrets::SecretSource;
use crate::splice::splice_resolved;
use crate::tokenize::{build_protect_request, fold_tokenized, FieldValue};
use crate::traversal::mark_record;

#[derive(Clone)]
pub struct ProtectionEngine {
    registry: Arc<PolicyRegistry>,
    retry: RetryController,
    batch_size: usize,
    max_concurrency: usize,
    max_depth: usize,
    unresolved_markers: UnresolvedMarkerPolicy,
}

impl ProtectionEngine {
    /// Engine talking to the HTTP service named in `config`.
    pub fn new(config: ProtectionConfig) -> Result<Self> {
        config.validate()?;
        let gateway = HttpGateway::new(&config)?;
        tracing::info!(host = %gateway.host(), "tokenization gateway configured");
        Self::with_gateway(config, Arc::new(gateway))
    }

    /// Resolve the host through `secrets` (when the config has none), then build.
    pub fn from_secrets(mut config: ProtectionConfig, secrets: &dyn SecretSource) -> Result<Self> {
        if config.service.host.is_none() {
            tracing::info!(source = %secrets.describe(), "loading service secrets");
            config.apply_secrets(&secrets.load()?);
        }
        Self::new(config)
    }

    /// Engine over any gateway implementation.
    pub fn with_gateway(
        config: ProtectionConfig,
        gateway: Arc<dyn ProtectionGateway>,
    ) -> Result<Self> {
        config.validate_limits()?;
        let registry = PolicyRegistry::from_config(&config.registry)?;

        tracing::debug!(
            fields = registry.field_count(),
            policies = registry.policy_count(),
            batch_size = config.batching.batch_size,
            max_attempts = config.retry.max_attempts,
            "protection engine ready"
        );

        Ok(Self {
            registry: Arc::new(registry),
            retry: RetryController::new(gateway, &config.retry),
            batch_size: config.batching.batch_size,
            max_concurrency: config.batching.max_concurrency,
            max_depth: config.traversal.max_depth,
            unresolved_markers: config.traversal.unresolved_markers,
        })
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Tokenize
    // ------------------------------------------------------------------

    /// Tokenize recognised fields with one protect call.
    pub async fn tokenize(&self, fields: &[(String, FieldValue)]) -> Result<TokenizedFields> {
        self.tokenize_with_context(fields, &CallContext::new()).await
    }

    pub async fn tokenize_with_context(
        &self,
        fields: &[(String, FieldValue)],
        ctx: &CallContext,
    ) -> Result<TokenizedFields> {
        let items = build_protect_request(
            fields.iter().map(|(name, value)| (name.as_str(), value)),
            &self.registry,
        );
        if items.is_empty() {
            tracing::debug!("no tokenizable fields, skipping protect call");
            return Ok(TokenizedFields::new());
        }

        let payload: Vec<Value> = items.iter().map(|item| item.to_wire()).collect();
        tracing::debug!(values = payload.len(), "tokenizing values");

        let results = self.retry.deliver(Operation::Protect, &payload, ctx).await?;
        Ok(fold_tokenized(&results))
    }

    /// Tokenize a JSON argument map (e.g. parsed query arguments).
    pub async fn tokenize_json(&self, args: &Map<String, Value>) -> Result<TokenizedFields> {
        let fields: Vec<(String, FieldValue)> = args
            .iter()
            .filter_map(|(name, value)| {
                FieldValue::from_json(value).map(|value| (name.clone(), value))
            })
            .collect();
        self.tokenize(&fields).await
    }

    // ------------------------------------------------------------------
    // Detokenize
    // ------------------------------------------------------------------

    /// Detokenize every encoded value in `records`, returning a new tree.
    pub async fn detokenize(&self, records: &Value) -> Result<Value> {
        self.detokenize_with_context(records, &CallContext::new())
            .await
    }

    pub async fn detokenize_with_context(
        &self,
        records: &Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let started = Instant::now();
        let marked = mark_record(records, &self.registry, self.max_depth)?;
        if marked.is_empty() {
            return Ok(marked.tree);
        }

        let payload: Vec<Value> = marked.requests.iter().map(|item| item.to_wire()).collect();
        let batches = split_batches(&payload, self.batch_size);
        tracing::debug!(
            values = payload.len(),
            batches = batches.len(),
            batch_size = self.batch_size,
            "detokenizing values"
        );

        let resolved: Vec<Vec<ResultItem>> = stream::iter(batches)
            .map(|batch| self.retry.deliver(Operation::Unprotect, batch, ctx))
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;
        let resolved: Vec<ResultItem> = resolved.into_iter().flatten().collect();

        let outcome = splice_resolved(marked, &resolved);
        if !outcome.unresolved.is_empty() {
            match self.unresolved_markers {
                UnresolvedMarkerPolicy::Leave => tracing::warn!(
                    unresolved = outcome.unresolved.len(),
                    paths = ?outcome.unresolved,
                    "markers left unresolved in detokenized record"
                ),
                UnresolvedMarkerPolicy::Error => {
                    tracing::error!(
                        unresolved = outcome.unresolved.len(),
                        paths = ?outcome.unresolved,
                        "tokenization service did not resolve every marker"
                    );
                    return Err(ProtectionError::UnresolvedMarkers {
                        count: outcome.unresolved.len(),
                    });
                }
            }
        }

        tracing::debug!(
            resolved = outcome.resolved,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "detokenization complete"
        );
        Ok(outcome.tree)
    }

    /// Detokenize a response envelope, once per top-level root key.
    pub async fn detokenize_envelope(&self, data: &Map<String, Value>) -> Result<Map<String, Value>> {
        self.detokenize_envelope_with_context(data, &CallContext::new())
            .await
    }

    pub async fn detokenize_envelope_with_context(
        &self,
        data: &Map<String, Value>,
        ctx: &CallContext,
    ) -> Result<Map<String, Value>> {
        let mut out = Map::with_capacity(data.len());
        for (root, records) in data {
            let detokenized = self.detokenize_with_context(records, ctx).await?;
            out.insert(root.clone(), detokenized);
        }
        Ok(out)
    }
}
