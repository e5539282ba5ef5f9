//! Response validator for one batch result.

use protection_types::{ResultItem, POLICY_NAME_KEY};
use serde_json::Value;

/// Outcome of validating one service response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchValidation {
    /// The whole batch must be requested again
    pub needs_retry: bool,
    /// Accepted items with `policyName` stripped (empty when `needs_retry`)
    pub items: Vec<ResultItem>,
}

impl BatchValidation {
    fn retry() -> Self {
        Self {
            needs_retry: true,
            items: Vec::new(),
        }
    }
}

/// Validate a raw service response.
///
/// An absent or empty response needs a retry. Any item that is not an object,
/// or carries fewer than two fields, rejects the whole batch.
pub fn validate_batch(response: Option<Vec<Value>>) -> BatchValidation {
    let raw = match response {
        Some(raw) if !raw.is_empty() => raw,
        _ => return BatchValidation::retry(),
    };

    let mut items = Vec::with_capacity(raw.len());
    for (index, item) in raw.into_iter().enumerate() {
        let mut object = match item {
            Value::Object(object) if object.len() >= 2 => object,
            _ => {
                tracing::debug!(index, "malformed item in service response, batch rejected");
                return BatchValidation::retry();
            }
        };
        object.shift_remove(POLICY_NAME_KEY);
        items.push(object);
    }

    BatchValidation {
        needs_retry: false,
        items,
    }
}
