//! The operation algebra of Tandem.
//!
//! Leaves first: [TextOp] and [ArrayOp] are operational transforms over a
//! character sequence and a JSON-value sequence. [ObjectOp] is the structural
//! algebra on top of them, addressing properties of a tree-shaped document by
//! [Path]. [DocumentChange] batches object operations into one logical edit.
//!
//! Every transform in this crate satisfies TP1: for concurrent `a`, `b`
//! produced against the same base state, `a'(b(s)) == b'(a(s))`.

pub mod array;
pub mod change;
pub mod object;
pub mod store;
pub mod text;

pub use array::ArrayOp;
pub use change::{rebase_onto, ChangeMeta, DocumentChange};
pub use object::{LeafOp, ObjectOp, TransformOptions};
pub use store::{DocumentStore, MapDocument};
pub use text::TextOp;

pub use serde_json::Value;
pub use tandem_common::{OtError, OtResult, Path};
