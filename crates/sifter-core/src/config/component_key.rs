//! Job-unique component identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one component instance within a job.
///
/// Results, failures and progress notifications are all keyed by this value,
/// so it must be unique per job. It is the same in every partition of a
/// partitioned run, which is what lets partial results be matched up.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentKey(String);

impl ComponentKey {
    /// Create a new component key from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Derive a key from a human label and the component's position in the job.
    ///
    /// The label is lowercased and every run of characters outside
    /// `[a-z0-9]` collapses into a single `-`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sifter_core::config::ComponentKey;
    ///
    /// assert_eq!(ComponentKey::derive("Value distribution", 2).id(), "value-distribution-2");
    /// assert_eq!(ComponentKey::derive("  Not null!  ", 0).id(), "not-null-0");
    /// assert_eq!(ComponentKey::derive("", 5).id(), "component-5");
    /// ```
    pub fn derive(label: &str, index: usize) -> Self {
        let mut slug = String::with_capacity(label.len());
        for ch in label.chars() {
            if ch.is_ascii_alphanumeric() {
                slug.push(ch.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_end_matches('-');
        let base = if slug.is_empty() { "component" } else { slug };
        Self(format!("{base}-{index}"))
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ComponentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
