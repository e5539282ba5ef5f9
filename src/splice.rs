//! Response splicer.
//!
//! Puts plaintext returned by the service back into a marked tree by walking
//! each marker's recorded path. Nothing is searched for textually, so a
//! plaintext or marker can never collide with unrelated content.

use std::collections::HashMap;

use protection_types::ResultItem;
use serde_json::Value;

use crate::traversal::{JsonPath, MarkedRecord, PathSegment};

/// Result of splicing resolved values into a marked tree
#[derive(Debug, Clone)]
pub struct SpliceOutcome {
    pub tree: Value,
    /// Markers replaced by plaintext
    pub resolved: usize,
    /// Paths of markers the service never answered for; left literally in `tree`
    pub unresolved: Vec<String>,
}

/// Apply resolved `{marker: plaintext}` pairs in the order given.
///
/// Each marker is applied at most once; a repeated pair for an already
/// resolved marker, or a key that is not one of this record's markers, is
/// ignored.
pub fn splice_resolved(marked: MarkedRecord, resolved: &[ResultItem]) -> SpliceOutcome {
    let MarkedRecord {
        mut tree,
        mut placements,
        ..
    } = marked;

    let mut applied = 0usize;
    let mut ignored = 0usize;

    for item in resolved {
        for (marker, plaintext) in item {
            match placements.remove(marker) {
                Some(path) => {
                    if replace_at(&mut tree, &path, marker, plaintext) {
                        applied += 1;
                    } else {
                        tracing::warn!(
                            path = %render_path(&path),
                            "marker missing at recorded path, value not spliced"
                        );
                    }
                }
                None => ignored += 1,
            }
        }
    }

    if ignored > 0 {
        tracing::debug!(ignored, "service returned keys that match no pending marker");
    }

    SpliceOutcome {
        tree,
        resolved: applied,
        unresolved: pending_paths(&placements),
    }
}

/// Rendered paths of markers still pending, sorted.
fn pending_paths(placements: &HashMap<String, JsonPath>) -> Vec<String> {
    let mut paths: Vec<String> = placements.values().map(|p| render_path(p)).collect();
    paths.sort();
    paths
}

fn replace_at(tree: &mut Value, path: &[PathSegment], marker: &str, plaintext: &Value) -> bool {
    let Some(node) = node_at_mut(tree, path) else {
        return false;
    };
    if node.as_str() != Some(marker) {
        return false;
    }
    *node = match plaintext {
        Value::String(text) => Value::String(text.clone()),
        other => Value::String(other.to_string()),
    };
    true
}

fn node_at_mut<'v>(tree: &'v mut Value, path: &[PathSegment]) -> Option<&'v mut Value> {
    let mut node = tree;
    for segment in path {
        node = match segment {
            PathSegment::Key(key) => node.get_mut(key.as_str())?,
            PathSegment::Index(index) => node.get_mut(*index)?,
        };
    }
    Some(node)
}

fn render_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "$".to_string();
    }
    std::iter::once("$".to_string())
        .chain(path.iter().map(|segment| segment.to_string()))
        .collect()
}
