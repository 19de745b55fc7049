use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// An ordered sequence of property-name segments addressing a value in the
/// document tree.
///
/// Paths are values: once constructed they are never mutated. Equality and
/// hashing are segment-wise. The JSON form is an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(SmallVec<[String; 2]>);

impl Path {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(segments.into_iter().map(Into::into).collect())
    }

    /// A single-segment path addressing a root property.
    pub fn root(segment: impl Into<String>) -> Self {
        Path(smallvec::smallvec![segment.into()])
    }

    #[inline]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The final segment, i.e. the property name, unless the path is empty.
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_str())
    }

    /// All segments except the last. Empty for single-segment paths.
    pub fn parent(&self) -> &[String] {
        match self.0.len() {
            0 => &[],
            n => &self.0[..n - 1],
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join("."))
    }
}

impl From<&str> for Path {
    fn from(segment: &str) -> Self {
        Path::root(segment)
    }
}

impl From<String> for Path {
    fn from(segment: String) -> Self {
        Path::root(segment)
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Path {
    fn from(segments: [S; N]) -> Self {
        Path::new(segments)
    }
}

impl From<Vec<String>> for Path {
    fn from(segments: Vec<String>) -> Self {
        Path(segments.into())
    }
}

impl From<&[&str]> for Path {
    fn from(segments: &[&str]) -> Self {
        Path::new(segments.iter().copied())
    }
}
