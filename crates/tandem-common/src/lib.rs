//! Shared vocabulary of the Tandem workspace.

mod error;
mod path;

pub use error::{OtError, OtResult};
pub use path::Path;

/// Monotonically increasing document version. A fresh document is at version 1.
pub type Version = u64;
/// Identifier of a client session, assigned by the transport layer.
pub type SessionId = u64;
/// Opaque document identifier.
pub type DocId = String;
