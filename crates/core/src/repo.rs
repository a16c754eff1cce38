//! Repository identity.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a public repository on the upstream host.
///
/// Identity is case-insensitive: two references differing only in case
/// denote the same repository and share one cache key. The original casing
/// is preserved for upstream queries and display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    owner: String,
    name: String,
}

impl RepoRef {
    /// Create a validated repository reference.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();
        validate_component(&owner, "owner")?;
        validate_component(&name, "name")?;
        Ok(Self { owner, name })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase owner, the canonical form stored in the database.
    pub fn canonical_owner(&self) -> String {
        self.owner.to_lowercase()
    }

    /// Lowercase name, the canonical form stored in the database.
    pub fn canonical_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Lowercase `owner/name` pair used as the cache and single-flight key.
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.canonical_owner(), self.canonical_name())
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn validate_component(value: &str, field: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidRepoRef(format!("{field} must not be empty")));
    }
    let ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !ok {
        return Err(Error::InvalidRepoRef(format!(
            "{field} '{value}' contains characters outside [A-Za-z0-9._-]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_references() {
        let repo = RepoRef::new("rust-lang", "rust").unwrap();
        assert_eq!(repo.owner(), "rust-lang");
        assert_eq!(repo.name(), "rust");
        assert_eq!(repo.to_string(), "rust-lang/rust");
    }

    #[test]
    fn cache_key_is_case_insensitive() {
        let a = RepoRef::new("Tokio-RS", "Tokio").unwrap();
        let b = RepoRef::new("tokio-rs", "tokio").unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "tokio-rs/tokio");
    }

    #[test]
    fn rejects_empty_components() {
        assert!(RepoRef::new("", "rust").is_err());
        assert!(RepoRef::new("rust-lang", "").is_err());
    }

    #[test]
    fn rejects_injection_characters() {
        assert!(RepoRef::new("a\"b", "c").is_err());
        assert!(RepoRef::new("a", "c d").is_err());
        assert!(RepoRef::new("a/b", "c").is_err());
    }
}
