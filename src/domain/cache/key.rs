//! Cache key derivation for tagged access

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

/// Namespace prefix shared by every tagged key
pub const TAG_NAMESPACE: &str = "tag";

/// An unordered, de-duplicated set of tags.
///
/// Tags are kept sorted so that the derived namespace depends only on the
/// set, never on the order the caller listed them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: BTreeSet<String>,
}

impl TagSet {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Iterates the tags in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Namespace shared by every key under this tag set.
    ///
    /// `tag:` followed by the SHA-256 of the length-prefixed sorted tags, so
    /// tags containing separators cannot alias another set and the
    /// namespace always has the same length.
    pub fn namespace(&self) -> String {
        let mut hasher = Sha256::new();

        for tag in self.iter() {
            hasher.update(tag.len().to_string().as_bytes());
            hasher.update(b":");
            hasher.update(tag.as_bytes());
        }

        format!("{}:{}", TAG_NAMESPACE, hex::encode(hasher.finalize()))
    }

    /// Effective store key for `key` under this tag set, `<namespace>:<key>`
    pub fn item_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace(), key)
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Joins a key prefix and a key with the `:` separator used across stores
pub fn prefixed_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, key),
        _ => key.to_string(),
    }
}
