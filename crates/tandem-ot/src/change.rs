//! A [DocumentChange] is an ordered batch of [ObjectOp]s treated as one
//! logical edit: created client-side, cloned during transformation, appended
//! to the hub's log on commit and broadcast to peers. Once logged it is never
//! mutated.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tandem_common::OtResult;

use crate::object::{ObjectOp, TransformOptions};
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    ops: SmallVec<[ObjectOp; 1]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<ChangeMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Unix time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl DocumentChange {
    pub fn new(ops: impl IntoIterator<Item = ObjectOp>) -> Self {
        DocumentChange {
            ops: ops.into_iter().collect(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: ChangeMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    #[inline]
    pub fn ops(&self) -> &[ObjectOp] {
        &self.ops
    }

    #[inline]
    pub fn meta(&self) -> Option<&ChangeMeta> {
        self.meta.as_ref()
    }

    /// True when nothing in the batch changes the document.
    pub fn is_nop(&self) -> bool {
        self.ops.iter().all(ObjectOp::is_nop)
    }

    pub fn apply<S: DocumentStore + ?Sized>(&self, store: &mut S) -> OtResult<()> {
        for op in &self.ops {
            op.apply(store)?;
        }
        Ok(())
    }

    /// The change that undoes this one: each op inverted, in reverse order.
    pub fn invert(&self) -> DocumentChange {
        DocumentChange {
            ops: self.ops.iter().rev().map(ObjectOp::invert).collect(),
            meta: self.meta.clone(),
        }
    }

    /// Drop NOPs produced by transformation. Optional; never changes what the
    /// batch does.
    pub fn compact(&mut self) {
        self.ops.retain(|op| !op.is_nop());
    }

    /// Pairwise batch transform of two concurrent changes against the same
    /// base, cloning the inputs.
    pub fn transform(
        a: &DocumentChange,
        b: &DocumentChange,
        options: TransformOptions,
    ) -> OtResult<(DocumentChange, DocumentChange)> {
        let mut a = a.clone();
        let mut b = b.clone();
        Self::transform_inplace(&mut a, &mut b, options)?;
        Ok((a, b))
    }

    /// In-place batch transform: every op of `a` against every op of `b`, in
    /// order. NOPs produced along the way are retained so indices stay
    /// stable; see [DocumentChange::compact].
    pub fn transform_inplace(
        a: &mut DocumentChange,
        b: &mut DocumentChange,
        options: TransformOptions,
    ) -> OtResult<()> {
        for ai in a.ops.iter_mut() {
            for bj in b.ops.iter_mut() {
                ObjectOp::transform_inplace(ai, bj, options)?;
            }
        }
        Ok(())
    }
}

impl FromIterator<ObjectOp> for DocumentChange {
    fn from_iter<I: IntoIterator<Item = ObjectOp>>(iter: I) -> Self {
        DocumentChange::new(iter)
    }
}

/// Rebase `incoming` across an ordered run of already-committed changes.
///
/// Returns the rebased incoming change together with the committed changes
/// transformed past it, i.e. what the lagging site must apply locally to
/// catch up after its own change has been rebased.
pub fn rebase_onto(
    incoming: &DocumentChange,
    missed: &[DocumentChange],
) -> OtResult<(DocumentChange, Vec<DocumentChange>)> {
    let mut incoming = incoming.clone();
    let mut missed: Vec<DocumentChange> = missed.to_vec();
    for m in missed.iter_mut() {
        DocumentChange::transform_inplace(m, &mut incoming, TransformOptions::default())?;
    }
    Ok((incoming, missed))
}
