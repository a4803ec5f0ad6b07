//! Canonical resource names.
//!
//! Model names arrive from untrusted producers. Before one can name a
//! Kubernetes resource it is reduced to the legal alphabet: ASCII letters,
//! digits, `-` and `.`. Every other character is stripped, never replaced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// Errors that can occur when building a [`CanonicalName`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// Nothing legal was left after stripping.
    #[error("name {raw:?} has no legal characters")]
    Empty {
        /// The raw name as supplied.
        raw: String,
    },
}

/// The outcome of [`canonicalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonicalized {
    /// The canonical form, possibly empty.
    pub name: String,
    /// Whether any character was stripped.
    pub mutated: bool,
}

/// Returns true if `c` may appear in a canonical name.
#[must_use]
pub const fn is_legal_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.'
}

/// Returns true if every character of `raw` is legal.
#[must_use]
pub fn is_canonical(raw: &str) -> bool {
    raw.chars().all(is_legal_char)
}

/// Strip every illegal character from `raw`.
///
/// Never fails. The result may be empty; callers that need a resource name
/// should go through [`CanonicalName::parse`] instead.
#[must_use]
pub fn canonicalize(raw: &str) -> Canonicalized {
    if is_canonical(raw) {
        return Canonicalized {
            name: raw.to_string(),
            mutated: false,
        };
    }

    Canonicalized {
        name: raw.chars().filter(|c| is_legal_char(*c)).collect(),
        mutated: true,
    }
}

/// A non-empty, cluster-legal resource name.
///
/// Shared by the workload and the network service of one deployment, and used
/// as the `name` label that ties pods back to both.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalName(String);

impl CanonicalName {
    /// Canonicalize `raw` and reject an empty result.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::Empty`] if `raw` contains no legal character.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        Self::parse_reporting(raw).map(|(name, _)| name)
    }

    /// Like [`parse`](Self::parse), also reporting whether `raw` was altered.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::Empty`] if `raw` contains no legal character.
    pub fn parse_reporting(raw: &str) -> Result<(Self, bool), NameError> {
        let Canonicalized { name, mutated } = canonicalize(raw);
        if name.is_empty() {
            return Err(NameError::Empty {
                raw: raw.to_string(),
            });
        }
        Ok((Self(name), mutated))
    }

    /// Build the name of a model version, `{model}-{version}`.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::Empty`] if nothing legal remains.
    pub fn for_model_version(model: &str, version: &str) -> Result<(Self, bool), NameError> {
        Self::parse_reporting(&format!("{model}-{version}"))
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanonicalName({})", self.0)
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for CanonicalName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CanonicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CanonicalName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CanonicalName> for String {
    fn from(name: CanonicalName) -> Self {
        name.0
    }
}
