//! Monitor identifier.

use std::borrow::Borrow;
use std::fmt;

/// Opaque identifier of one monitor instance.
///
/// The supervisor keys its registration table by this id and the write-back
/// server routes decoded payloads with it. Two monitors must never share an id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MonitorId(String);

impl MonitorId {
    /// Create a monitor id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id can never be routed to.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the id, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MonitorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MonitorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for MonitorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MonitorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
