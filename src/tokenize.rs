//! Tokenization assembler.
//!
//! Builds the protect request from a flat field map and folds the service's
//! answer back into a [`TokenizedFields`] map.

use chrono::NaiveDate;
use protection_types::{ResultItem, TokenizeItem, TokenizedFields};
use serde_json::Value;

use crate::registry::PolicyRegistry;

/// Format sent for date values
pub const DATE_FORMAT: &str = "%Y%m%d";

/// A value supplied for tokenization
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(serde_json::Number),
    Date(NaiveDate),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Wire text for a scalar value; lists are expanded by the caller.
    fn wire_text(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Number(number) => number.to_string(),
            FieldValue::Date(date) => date.format(DATE_FORMAT).to_string(),
            FieldValue::List(items) => items
                .iter()
                .map(FieldValue::wire_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        FieldValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl FieldValue {
    /// Convert a JSON value (e.g. parsed query arguments).
    ///
    /// Strings, numbers and booleans become text, arrays become lists;
    /// `null` and objects have no tokenizable form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(FieldValue::Text(text.clone())),
            Value::Number(number) => Some(FieldValue::Number(number.clone())),
            Value::Bool(flag) => Some(FieldValue::Text(flag.to_string())),
            Value::Array(items) => Some(FieldValue::List(
                items.iter().filter_map(FieldValue::from_json).collect(),
            )),
            Value::Null | Value::Object(_) => None,
        }
    }
}

/// Build the flat protect request.
///
/// Fields missing from the registry are skipped. Dates become `YYYYMMDD`;
/// each list element becomes its own item under the field's policy.
pub fn build_protect_request<'a>(
    fields: impl IntoIterator<Item = (&'a str, &'a FieldValue)>,
    registry: &PolicyRegistry,
) -> Vec<TokenizeItem> {
    let mut items = Vec::new();

    for (field, value) in fields {
        let Some(policy) = registry.policy_for_field(field) else {
            tracing::debug!(field, "field is not tokenizable, skipped");
            continue;
        };
        match value {
            FieldValue::List(elements) => {
                for element in elements {
                    items.push(TokenizeItem::new(field, element.wire_text(), policy));
                }
            }
            scalar => items.push(TokenizeItem::new(field, scalar.wire_text(), policy)),
        }
    }
    items
}

/// Fold result items into a field → token(s) map.
///
/// Every key of every item is taken in order; a repeated field name promotes
/// its slot to a list.
pub fn fold_tokenized(results: &[ResultItem]) -> TokenizedFields {
    let mut fields = TokenizedFields::new();
    for item in results {
        for (field, token) in item {
            let token = match token {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            fields.append(field, token);
        }
    }
    fields
}
