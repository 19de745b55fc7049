//! The hub side of Tandem: a per-document linearizer for concurrent edits,
//! the client session state machine, and the wire protocol between them.
//!
//! The hub is single-threaded per document. Sessions talk to it strictly by
//! message passing; transformation and application are synchronous and
//! CPU-bound, so only transport I/O ever suspends.

pub mod hub;
pub mod message;
pub mod session;

pub use hub::{Hub, HubConfig, HubRequest};
pub use message::{ClientMessage, ServerMessage};
pub use session::{Session, SessionStatus};

pub use tandem_common::{DocId, OtError, OtResult, Path, SessionId, Version};
pub use tandem_ot::{DocumentChange, DocumentStore, MapDocument, ObjectOp};
