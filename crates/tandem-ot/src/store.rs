//! The document adapter consumed by the operation algebra.
//!
//! The core treats the document as opaque: it only reads, writes and strictly
//! deletes values by path. Schema checks belong to the adapter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tandem_common::{OtError, OtResult, Path};

use crate::DocumentChange;

pub trait DocumentStore {
    fn get(&self, path: &Path) -> Option<&Value>;
    fn set(&mut self, path: &Path, val: Value) -> OtResult<()>;
    /// Strict delete: an absent path is an error, and the removed value is
    /// returned.
    fn delete(&mut self, path: &Path) -> OtResult<Value>;

    /// Bulk entry point used by the hub to apply committed changes.
    fn apply_change(&mut self, change: &DocumentChange) -> OtResult<()>
    where
        Self: Sized,
    {
        change.apply(self)
    }
}

/// A tree of nested JSON objects addressed by path segments. `set` creates
/// missing intermediate objects; a non-object intermediate is an adapter
/// error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapDocument {
    root: Map<String, Value>,
}

impl MapDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from a JSON object. Anything else is rejected.
    pub fn from_value(value: Value) -> OtResult<Self> {
        match value {
            Value::Object(root) => Ok(MapDocument { root }),
            other => Err(OtError::Adapter(
                format!("document root must be an object, got {other}").into_boxed_str(),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// The object containing the path's leaf, walking but never creating.
    fn parent(&self, path: &Path) -> Option<&Map<String, Value>> {
        let mut node = &self.root;
        for seg in path.parent() {
            node = node.get(seg)?.as_object()?;
        }
        Some(node)
    }

    fn parent_mut(&mut self, path: &Path) -> OtResult<&mut Map<String, Value>> {
        let mut node = &mut self.root;
        for seg in path.parent() {
            node = node
                .get_mut(seg)
                .ok_or_else(|| OtError::NotFound(seg.clone().into_boxed_str()))?
                .as_object_mut()
                .ok_or_else(|| {
                    OtError::Adapter(format!("\"{seg}\" is not an object").into_boxed_str())
                })?;
        }
        Ok(node)
    }
}

impl DocumentStore for MapDocument {
    fn get(&self, path: &Path) -> Option<&Value> {
        let leaf = path.leaf()?;
        self.parent(path)?.get(leaf)
    }

    fn set(&mut self, path: &Path, val: Value) -> OtResult<()> {
        let leaf = path
            .leaf()
            .ok_or_else(|| OtError::Adapter("cannot set an empty path".into()))?;
        let mut node = &mut self.root;
        for seg in path.parent() {
            node = node
                .entry(seg.clone())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .ok_or_else(|| {
                    OtError::Adapter(format!("\"{seg}\" is not an object").into_boxed_str())
                })?;
        }
        node.insert(leaf.to_owned(), val);
        Ok(())
    }

    fn delete(&mut self, path: &Path) -> OtResult<Value> {
        let leaf = path
            .leaf()
            .ok_or_else(|| OtError::Adapter("cannot delete an empty path".into()))?
            .to_owned();
        self.parent_mut(path)?
            .remove(&leaf)
            .ok_or_else(|| OtError::NotFound(path.to_string().into_boxed_str()))
    }
}
