//! The structural operation algebra.
//!
//! An [ObjectOp] edits one property of the document tree, addressed by
//! [Path]. The pairwise [ObjectOp::transform] is total over every pair of
//! well-typed operations on the same property and satisfies TP1; pairs that
//! cannot arise from a common base state (two concurrent creates of the same
//! path, a create racing anything else, an update racing a set) are rejected
//! as [OtError::IllegalTransform].

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_common::{OtError, OtResult, Path};

use crate::store::DocumentStore;
use crate::{ArrayOp, TextOp};

/// Leaf diff carried by [ObjectOp::Update].
///
/// The discriminant replaces the serialized `propertyType` tag, which is a
/// derived view kept only in the JSON form.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum LeafOp {
    Text(TextOp),
    Array(ArrayOp),
}

impl From<TextOp> for LeafOp {
    fn from(op: TextOp) -> Self {
        LeafOp::Text(op)
    }
}

impl From<ArrayOp> for LeafOp {
    fn from(op: ArrayOp) -> Self {
        LeafOp::Array(op)
    }
}

impl LeafOp {
    /// The `propertyType` tag used in the persisted form.
    pub fn property_type(&self) -> &'static str {
        match self {
            LeafOp::Text(_) => "string",
            LeafOp::Array(_) => "array",
        }
    }

    pub fn is_nop(&self) -> bool {
        match self {
            LeafOp::Text(op) => op.is_nop(),
            LeafOp::Array(op) => op.is_nop(),
        }
    }

    pub fn apply(&self, value: &Value) -> OtResult<Value> {
        match self {
            LeafOp::Text(op) => {
                let text = value.as_str().ok_or_else(|| {
                    OtError::Adapter("text op applied to a non-string value".into())
                })?;
                Ok(Value::String(op.apply(text)?))
            }
            LeafOp::Array(op) => op.apply(value),
        }
    }

    pub fn invert(&self) -> LeafOp {
        match self {
            LeafOp::Text(op) => LeafOp::Text(op.invert()),
            LeafOp::Array(op) => LeafOp::Array(op.invert()),
        }
    }

    fn transform(a: LeafOp, b: LeafOp, path: &Path) -> OtResult<(LeafOp, LeafOp)> {
        match (a, b) {
            (LeafOp::Text(mut x), LeafOp::Text(mut y)) => {
                TextOp::transform(&mut x, &mut y);
                Ok((LeafOp::Text(x), LeafOp::Text(y)))
            }
            (LeafOp::Array(mut x), LeafOp::Array(mut y)) => {
                ArrayOp::transform(&mut x, &mut y);
                Ok((LeafOp::Array(x), LeafOp::Array(y)))
            }
            (a, b) => Err(OtError::IllegalTransform {
                left: a.property_type(),
                right: b.property_type(),
                path: path.to_string(),
            }),
        }
    }
}

/// A structural operation on one property of the document tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectOp {
    Nop,
    /// Create a value at a path that had none.
    Create { path: Path, val: Value },
    /// Remove the value at a path; `val` records the removed value.
    Delete { path: Path, val: Value },
    /// Apply a leaf diff to the existing value.
    Update { path: Path, diff: LeafOp },
    /// Replace a scalar-or-opaque value. `None` means unset on that side.
    Set {
        path: Path,
        val: Option<Value>,
        original: Option<Value>,
    },
}

/// Behavior switches for [ObjectOp::transform].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformOptions {
    /// Raise [OtError::Conflict] whenever both ops touch the same path,
    /// instead of resolving the pair.
    pub no_conflict: bool,
}

impl ObjectOp {
    pub fn create(path: impl Into<Path>, val: impl Into<Value>) -> Self {
        ObjectOp::Create {
            path: path.into(),
            val: val.into(),
        }
    }

    pub fn delete(path: impl Into<Path>, val: impl Into<Value>) -> Self {
        ObjectOp::Delete {
            path: path.into(),
            val: val.into(),
        }
    }

    pub fn update(path: impl Into<Path>, diff: impl Into<LeafOp>) -> Self {
        ObjectOp::Update {
            path: path.into(),
            diff: diff.into(),
        }
    }

    /// `original` is the value being replaced, `val` the replacement.
    pub fn set(
        path: impl Into<Path>,
        original: impl Into<Option<Value>>,
        val: impl Into<Option<Value>>,
    ) -> Self {
        ObjectOp::Set {
            path: path.into(),
            val: val.into(),
            original: original.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObjectOp::Nop => "NOP",
            ObjectOp::Create { .. } => "create",
            ObjectOp::Delete { .. } => "delete",
            ObjectOp::Update { .. } => "update",
            ObjectOp::Set { .. } => "set",
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ObjectOp::Nop => None,
            ObjectOp::Create { path, .. }
            | ObjectOp::Delete { path, .. }
            | ObjectOp::Update { path, .. }
            | ObjectOp::Set { path, .. } => Some(path),
        }
    }

    /// True for the NOP variant and for updates whose diff changes nothing.
    pub fn is_nop(&self) -> bool {
        match self {
            ObjectOp::Nop => true,
            ObjectOp::Update { diff, .. } => diff.is_nop(),
            _ => false,
        }
    }

    /// Apply the op to a document. Values handed to the store are clones;
    /// the op's own payload is never mutated.
    pub fn apply<S: DocumentStore + ?Sized>(&self, store: &mut S) -> OtResult<()> {
        if self.is_nop() {
            return Ok(());
        }
        match self {
            ObjectOp::Nop => Ok(()),
            // Creating over an existing value overwrites it; the hub's
            // strict_create knob rejects such commits up front.
            ObjectOp::Create { path, val } => store.set(path, val.clone()),
            ObjectOp::Delete { path, .. } => store.delete(path).map(|_| ()),
            ObjectOp::Update { path, diff } => {
                let old = store
                    .get(path)
                    .ok_or_else(|| OtError::NotFound(path.to_string().into()))?;
                let new = diff.apply(old)?;
                store.set(path, new)
            }
            ObjectOp::Set { path, val, .. } => match val {
                Some(v) => store.set(path, v.clone()),
                None => {
                    if store.get(path).is_some() {
                        store.delete(path).map(|_| ())
                    } else {
                        Ok(())
                    }
                }
            },
        }
    }

    /// The op that undoes this one when applied after it.
    pub fn invert(&self) -> ObjectOp {
        match self {
            ObjectOp::Nop => ObjectOp::Nop,
            ObjectOp::Create { path, val } => ObjectOp::Delete {
                path: path.clone(),
                val: val.clone(),
            },
            ObjectOp::Delete { path, val } => ObjectOp::Create {
                path: path.clone(),
                val: val.clone(),
            },
            ObjectOp::Update { path, diff } => ObjectOp::Update {
                path: path.clone(),
                diff: diff.invert(),
            },
            ObjectOp::Set {
                path,
                val,
                original,
            } => ObjectOp::Set {
                path: path.clone(),
                val: original.clone(),
                original: val.clone(),
            },
        }
    }

    /// Transform concurrent `a` and `b`, cloning the inputs.
    pub fn transform(
        a: &ObjectOp,
        b: &ObjectOp,
        options: TransformOptions,
    ) -> OtResult<(ObjectOp, ObjectOp)> {
        let mut a = a.clone();
        let mut b = b.clone();
        Self::transform_inplace(&mut a, &mut b, options)?;
        Ok((a, b))
    }

    /// Transform concurrent `a` and `b` in place.
    ///
    /// On error the pair is left in an unspecified state; callers that need
    /// the originals transform throwaway clones (the hub always does).
    pub fn transform_inplace(
        a: &mut ObjectOp,
        b: &mut ObjectOp,
        options: TransformOptions,
    ) -> OtResult<()> {
        if a.is_nop() || b.is_nop() {
            return Ok(());
        }
        let same_path = match (a.path(), b.path()) {
            (Some(pa), Some(pb)) => pa == pb,
            _ => false,
        };
        if !same_path {
            return Ok(());
        }
        if options.no_conflict {
            return Err(OtError::Conflict {
                path: a.path().map(Path::to_string).unwrap_or_default(),
                left: a.to_json().to_string().into(),
                right: b.to_json().to_string().into(),
            });
        }
        let ta = std::mem::replace(a, ObjectOp::Nop);
        let tb = std::mem::replace(b, ObjectOp::Nop);
        let (ta, tb) = Self::transform_same_path(ta, tb)?;
        *a = ta;
        *b = tb;
        Ok(())
    }

    /// Resolve a same-path pair. Where the algebra must pick a winner, the
    /// right operand wins: the hub passes committed changes on the left and
    /// the incoming change on the right.
    fn transform_same_path(a: ObjectOp, b: ObjectOp) -> OtResult<(ObjectOp, ObjectOp)> {
        use ObjectOp::*;
        let (ka, kb) = (a.kind(), b.kind());
        let illegal = |path: &Path| OtError::IllegalTransform {
            left: ka,
            right: kb,
            path: path.to_string(),
        };
        Ok(match (a, b) {
            // A create implies the path was absent; every concurrent op on
            // the same path implies it was present. Unresolvable.
            (Create { path, .. }, _) | (_, Create { path, .. }) => return Err(illegal(&path)),

            (Delete { .. }, Delete { .. }) => (Nop, Nop),

            // Delete vs update: the delete wins but must now remove the
            // post-update value to stay invertible; the update is dropped.
            (Delete { path, val }, Update { diff, .. }) => {
                let val = diff.apply(&val)?;
                (Delete { path, val }, Nop)
            }
            (Update { diff, .. }, Delete { path, val }) => {
                let val = diff.apply(&val)?;
                (Nop, Delete { path, val })
            }

            (Update { path, diff: da }, Update { diff: db, .. }) => {
                let (da, db) = LeafOp::transform(da, db, &path)?;
                (
                    Update {
                        path: path.clone(),
                        diff: da,
                    },
                    Update { path, diff: db },
                )
            }

            // Delete vs set: the set wins; its original is cleared because
            // the state it replaces is now the deletion.
            (Delete { .. }, Set { path, val, .. }) => (
                Nop,
                Set {
                    path,
                    val,
                    original: None,
                },
            ),
            // Flipped, the delete wins and removes the post-set value.
            (Set { val, .. }, Delete { path, .. }) => match val {
                Some(v) => (Nop, Delete { path, val: v }),
                None => (Nop, Nop),
            },

            // Set vs set: `b` wins; it now replaces what `a` wrote.
            (Set { val: av, .. }, Set { path, val, .. }) => (
                Nop,
                Set {
                    path,
                    val,
                    original: av,
                },
            ),

            (Update { .. }, Set { path, .. }) | (Set { .. }, Update { path, .. }) => {
                return Err(illegal(&path))
            }

            // NOPs were filtered out by the caller.
            pair => pair,
        })
    }

    /// Canonical JSON form of the op.
    pub fn to_json(&self) -> Value {
        // OpRepr only contains JSON-representable data.
        serde_json::to_value(self.to_repr()).unwrap_or(Value::Null)
    }

    /// Reconstruct an op from its canonical JSON form, enforcing the
    /// construction invariants.
    pub fn from_json(value: Value) -> OtResult<ObjectOp> {
        let repr: OpRepr = serde_json::from_value(value)
            .map_err(|e| OtError::MalformedOp(e.to_string().into_boxed_str()))?;
        Self::from_repr(repr)
    }

    fn to_repr(&self) -> OpRepr {
        let mut repr = OpRepr {
            kind: self.kind().to_owned(),
            path: self.path().cloned(),
            val: None,
            original: None,
            property_type: None,
            diff: None,
        };
        match self {
            ObjectOp::Nop => {}
            ObjectOp::Create { val, .. } | ObjectOp::Delete { val, .. } => {
                repr.val = Some(val.clone());
            }
            ObjectOp::Update { diff, .. } => {
                repr.property_type = Some(diff.property_type().to_owned());
                repr.diff = Some(match diff {
                    LeafOp::Text(op) => serde_json::to_value(op).unwrap_or(Value::Null),
                    LeafOp::Array(op) => serde_json::to_value(op).unwrap_or(Value::Null),
                });
            }
            ObjectOp::Set { val, original, .. } => {
                repr.val = val.clone();
                repr.original = original.clone();
            }
        }
        repr
    }

    fn from_repr(repr: OpRepr) -> OtResult<ObjectOp> {
        let malformed = |msg: &str| OtError::MalformedOp(msg.into());
        let path = |path: Option<Path>| -> OtResult<Path> {
            match path {
                Some(p) if !p.is_empty() => Ok(p),
                Some(_) => Err(malformed("empty path")),
                None => Err(malformed("missing path")),
            }
        };
        match repr.kind.as_str() {
            "NOP" => Ok(ObjectOp::Nop),
            "create" => Ok(ObjectOp::Create {
                path: path(repr.path)?,
                val: repr.val.ok_or_else(|| malformed("create without a val"))?,
            }),
            "delete" => Ok(ObjectOp::Delete {
                path: path(repr.path)?,
                val: repr.val.ok_or_else(|| malformed("delete without a val"))?,
            }),
            "update" => {
                let diff_json = repr.diff.ok_or_else(|| malformed("update without a diff"))?;
                let diff = match repr.property_type.as_deref() {
                    Some("string") => LeafOp::Text(
                        serde_json::from_value(diff_json)
                            .map_err(|e| OtError::MalformedOp(e.to_string().into_boxed_str()))?,
                    ),
                    Some("array") => LeafOp::Array(
                        serde_json::from_value(diff_json)
                            .map_err(|e| OtError::MalformedOp(e.to_string().into_boxed_str()))?,
                    ),
                    Some(other) => {
                        return Err(OtError::MalformedOp(
                            format!("unknown propertyType \"{other}\"").into_boxed_str(),
                        ))
                    }
                    None => return Err(malformed("update without a propertyType")),
                };
                Ok(ObjectOp::Update {
                    path: path(repr.path)?,
                    diff,
                })
            }
            "set" => Ok(ObjectOp::Set {
                path: path(repr.path)?,
                val: repr.val,
                original: repr.original,
            }),
            other => Err(OtError::MalformedOp(
                format!("unknown operation type \"{other}\"").into_boxed_str(),
            )),
        }
    }
}

/// The persisted shape of an [ObjectOp]. `val`/`original` collapse JSON
/// `null` and an absent key into the same unset state, which the invariants
/// of §construction permit: create and delete require a non-null value, and
/// a set treats null as "unset on that side".
#[derive(Serialize, Deserialize)]
struct OpRepr {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<Path>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    val: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original: Option<Value>,
    #[serde(
        rename = "propertyType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    diff: Option<Value>,
}

impl Serialize for ObjectOp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_repr().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectOp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = OpRepr::deserialize(deserializer)?;
        ObjectOp::from_repr(repr).map_err(serde::de::Error::custom)
    }
}
