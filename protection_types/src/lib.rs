//! Protection Types - Level 1 Foundation Types
//!
//! Pure data structures exchanged with the external tokenization service.
//! Everything here is serialisable and free of transport or engine logic.
//!
//! ## Contents
//!
//! - Operation kinds and their service routes
//! - Flat request items (tokenize / detokenize)
//! - Result items returned by the service
//! - Tokenized result map with scalar-to-list folding
//!
//! ## Critical Rules
//!
//! 1. **NO NETWORK OR ENGINE LOGIC** - Only data structures
//! 2. **NO WORKSPACE DEPENDENCIES** - Cannot depend on other workspace crates
//! 3. **SERIALIZABLE** - Wire types must match the service JSON exactly

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Key carrying the policy name on request and response items.
pub const POLICY_NAME_KEY: &str = "policyName";

/// Delimiter separating plaintext from policy name in an encoded string leaf.
pub const ENCODED_DELIMITER: &str = "$$";

/// A single item returned by the service after validation (`policyName` stripped).
///
/// Detokenize results are `{marker: plaintext}`, tokenize results are
/// `{fieldName: token}`.
pub type ResultItem = Map<String, Value>;

// ============================================================================
// OPERATIONS
// ============================================================================

/// Kind of call issued against the tokenization service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Create protected values (tokenize)
    Protect,
    /// Recover plaintext from protected values (detokenize)
    Unprotect,
}

impl Operation {
    /// Route appended to the service host
    pub fn route(&self) -> &'static str {
        match self {
            Operation::Protect => "protectList",
            Operation::Unprotect => "unprotectList",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Protect => write!(f, "protect"),
            Operation::Unprotect => write!(f, "unprotect"),
        }
    }
}

// ============================================================================
// REQUEST ITEMS
// ============================================================================

/// Flat detokenization request item.
///
/// On the wire: `{"policyName": P, "<marker>": "<encoded value>"}`; the service
/// answers with `{"<marker>": "<plaintext>"}` so the marker is the correlation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetokenizeItem {
    pub policy_name: String,
    pub marker: String,
    pub value: String,
}

impl DetokenizeItem {
    pub fn new(
        policy_name: impl Into<String>,
        marker: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            policy_name: policy_name.into(),
            marker: marker.into(),
            value: value.into(),
        }
    }

    /// JSON object sent to the service
    pub fn to_wire(&self) -> Value {
        let mut map = Map::with_capacity(2);
        map.insert(POLICY_NAME_KEY.to_string(), Value::String(self.policy_name.clone()));
        map.insert(self.marker.clone(), Value::String(self.value.clone()));
        Value::Object(map)
    }
}

/// Flat tokenization request item.
///
/// On the wire: `{"<fieldName>": "<value>", "policyName": P}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizeItem {
    pub field: String,
    pub value: String,
    pub policy_name: String,
}

impl TokenizeItem {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        policy_name: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            policy_name: policy_name.into(),
        }
    }

    /// JSON object sent to the service
    pub fn to_wire(&self) -> Value {
        let mut map = Map::with_capacity(2);
        map.insert(self.field.clone(), Value::String(self.value.clone()));
        map.insert(POLICY_NAME_KEY.to_string(), Value::String(self.policy_name.clone()));
        Value::Object(map)
    }
}

// ============================================================================
// TOKENIZED RESULT MAP
// ============================================================================

/// Token(s) stored under one field name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenValue {
    Single(String),
    Multiple(Vec<String>),
}

impl TokenValue {
    /// All tokens in order
    pub fn as_slice(&self) -> &[String] {
        match self {
            TokenValue::Single(token) => std::slice::from_ref(token),
            TokenValue::Multiple(tokens) => tokens,
        }
    }

    /// The token when exactly one value was tokenized under the field
    pub fn as_single(&self) -> Option<&str> {
        match self {
            TokenValue::Single(token) => Some(token),
            TokenValue::Multiple(_) => None,
        }
    }
}

/// Field name → token(s), in order of first appearance.
///
/// Serialises as a JSON object keeping that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizedFields {
    entries: Vec<(String, TokenValue)>,
}

impl TokenizedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token under `field`.
    ///
    /// The first token is stored as a scalar; a second one promotes the slot to
    /// a list, later ones append.
    pub fn append(&mut self, field: &str, token: impl Into<String>) {
        let token = token.into();
        match self.entries.iter_mut().find(|(name, _)| name == field) {
            Some((_, slot)) => match slot {
                TokenValue::Single(first) => {
                    let first = std::mem::take(first);
                    *slot = TokenValue::Multiple(vec![first, token]);
                }
                TokenValue::Multiple(tokens) => tokens.push(token),
            },
            None => self
                .entries
                .push((field.to_string(), TokenValue::Single(token))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&TokenValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TokenValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert into a JSON object (order preserved)
    pub fn into_json(self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    TokenValue::Single(token) => Value::String(token),
                    TokenValue::Multiple(tokens) => {
                        Value::Array(tokens.into_iter().map(Value::String).collect())
                    }
                };
                (name, value)
            })
            .collect();
        Value::Object(map)
    }
}

impl Serialize for TokenizedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
