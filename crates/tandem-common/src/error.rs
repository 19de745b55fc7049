use thiserror::Error;

use crate::Version;

pub type OtResult<T> = Result<T, OtError>;

#[derive(Error, Debug, PartialEq)]
pub enum OtError {
    #[error("Malformed operation: {0}")]
    MalformedOp(Box<str>),
    #[error("Conflicting operations at \"{path}\": {left} vs {right}")]
    Conflict {
        path: String,
        left: Box<str>,
        right: Box<str>,
    },
    #[error("Cannot transform concurrent {left} against {right} at \"{path}\"")]
    IllegalTransform {
        left: &'static str,
        right: &'static str,
        path: String,
    },
    #[error("Client version {claimed} is ahead of the hub version {actual}")]
    InvalidVersion { claimed: Version, actual: Version },
    #[error("Document adapter error: {0}")]
    Adapter(Box<str>),
    #[error("Cannot find {0}")]
    NotFound(Box<str>),
    #[error("Index out of bound. The given pos is {pos}, but the length is {len}")]
    OutOfBound { pos: usize, len: usize },
    #[error("Operation does not match the document state: expected {expected}, found {found}")]
    StateMismatch { expected: Box<str>, found: Box<str> },
    #[error("Session is {found}, expected {expected}")]
    SessionState {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Decode error: ({0})")]
    Decode(Box<str>),
}
