//! Detokenization traversal engine.
//!
//! Walks a record tree depth-first and replaces every encoded value with a
//! fresh correlation marker, producing:
//!
//! - a marked copy of the tree (the input is left untouched),
//! - the flat detokenize request list, in traversal order,
//! - the structural path of every marker, used later by the splicer.
//!
//! ## Encoded values
//!
//! ```text
//! "123456789$$SSN"              string leaf: plaintext, delimiter, policy
//! ["tokA", "tokB", "firstName"] policy group: values followed by a policy tag
//! ```
//!
//! Only policy names present in the [`PolicyRegistry`] are recognised.

use std::collections::{HashMap, HashSet};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use protection_types::{DetokenizeItem, ENCODED_DELIMITER};
use rand::RngCore;
use serde_json::{Map, Value};

use crate::error::{ProtectionError, Result};
use crate::registry::PolicyRegistry;

/// Random bytes per marker (14 URL-safe characters once encoded).
const MARKER_BYTES: usize = 10;

/// One step in a structural path through a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, ".{}", key),
            PathSegment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

pub type JsonPath = Vec<PathSegment>;

/// Result of marking one record tree
#[derive(Debug, Clone)]
pub struct MarkedRecord {
    /// Copy of the input with every encoded value replaced by its marker
    pub tree: Value,
    /// Flat detokenize request, in deterministic traversal order
    pub requests: Vec<DetokenizeItem>,
    /// marker → location of the marker inside `tree`
    pub placements: HashMap<String, JsonPath>,
}

impl MarkedRecord {
    /// True when the record held no encoded values
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Issues markers unique within one traversal
#[derive(Debug, Default)]
struct MarkerGenerator {
    issued: HashSet<String>,
}

impl MarkerGenerator {
    fn next(&mut self) -> String {
        let mut bytes = [0u8; MARKER_BYTES];
        loop {
            rand::thread_rng().fill_bytes(&mut bytes);
            let marker = URL_SAFE_NO_PAD.encode(bytes);
            if self.issued.insert(marker.clone()) {
                return marker;
            }
        }
    }
}

/// Mark `record` for detokenization.
///
/// A root mapping is traversed directly; a root sequence traverses each of its
/// mapping elements. Fails with `StructureTooDeep` when container nesting
/// exceeds `max_depth`.
pub fn mark_record(
    record: &Value,
    registry: &PolicyRegistry,
    max_depth: usize,
) -> Result<MarkedRecord> {
    let mut tree = record.clone();
    let mut walker = Walker {
        registry,
        max_depth,
        markers: MarkerGenerator::default(),
        requests: Vec::new(),
        placements: HashMap::new(),
        path: Vec::new(),
    };

    match &mut tree {
        Value::Object(map) => walker.visit_object(map, 1)?,
        Value::Array(items) => walker.visit_untagged_list(items, 1)?,
        _ => {}
    }

    Ok(MarkedRecord {
        tree,
        requests: walker.requests,
        placements: walker.placements,
    })
}

/// Split `plaintext$$policy` when the suffix after the last delimiter is a known policy.
pub fn split_encoded<'a>(value: &'a str, registry: &PolicyRegistry) -> Option<(&'a str, &'a str)> {
    value
        .rsplit_once(ENCODED_DELIMITER)
        .filter(|(_, policy)| registry.is_policy(policy))
}

/// A sequence is a policy group when its trailing element is a known policy name.
pub fn is_policy_group(items: &[Value], registry: &PolicyRegistry) -> bool {
    matches!(items.last(), Some(Value::String(tag)) if registry.is_policy(tag))
}

struct Walker<'a> {
    registry: &'a PolicyRegistry,
    max_depth: usize,
    markers: MarkerGenerator,
    requests: Vec<DetokenizeItem>,
    placements: HashMap<String, JsonPath>,
    path: JsonPath,
}

impl Walker<'_> {
    fn enter(&self, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(ProtectionError::StructureTooDeep {
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    fn visit_object(&mut self, map: &mut Map<String, Value>, depth: usize) -> Result<()> {
        self.enter(depth)?;

        for (key, value) in map.iter_mut() {
            self.path.push(PathSegment::Key(key.clone()));
            match value {
                Value::String(text) => {
                    if let Some((prefix, policy)) = split_encoded(text, self.registry) {
                        let item = DetokenizeItem::new(policy, "", prefix);
                        *value = Value::String(self.place(item));
                    }
                }
                Value::Array(items) => {
                    if is_policy_group(items, self.registry) {
                        self.replace_group(items, depth + 1)?;
                    } else {
                        self.visit_untagged_list(items, depth + 1)?;
                    }
                }
                Value::Object(inner) => self.visit_object(inner, depth + 1)?,
                _ => {}
            }
            self.path.pop();
        }
        Ok(())
    }

    /// Strings and nested sequences inside an untagged sequence are never
    /// treated as encoded; only mapping elements are descended into.
    fn visit_untagged_list(&mut self, items: &mut [Value], depth: usize) -> Result<()> {
        self.enter(depth)?;

        for (index, item) in items.iter_mut().enumerate() {
            if let Value::Object(inner) = item {
                self.path.push(PathSegment::Index(index));
                self.visit_object(inner, depth + 1)?;
                self.path.pop();
            }
        }
        Ok(())
    }

    fn replace_group(&mut self, items: &mut Vec<Value>, depth: usize) -> Result<()> {
        self.enter(depth)?;

        let policy = match items.pop() {
            Some(Value::String(policy)) => policy,
            _ => return Ok(()),
        };

        for (index, item) in items.iter_mut().enumerate() {
            let plaintext = match &mut *item {
                Value::String(text) => std::mem::take(text),
                other => other.to_string(),
            };
            self.path.push(PathSegment::Index(index));
            let marker = self.place(DetokenizeItem::new(policy.as_str(), "", plaintext));
            self.path.pop();
            *item = Value::String(marker);
        }
        Ok(())
    }

    /// Issue a marker for `item` at the current path and record the request.
    fn place(&mut self, mut item: DetokenizeItem) -> String {
        let marker = self.markers.next();
        item.marker = marker.clone();
        self.placements.insert(marker.clone(), self.path.clone());
        self.requests.push(item);
        marker
    }
}
