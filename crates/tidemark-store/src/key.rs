//! Structured query keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One segment of a structured query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    /// String segment (feature names, ids, slugs).
    Str(String),
    /// Integer segment (page sizes, numeric filters).
    Int(u64),
    /// Boolean segment (flags such as archived filters).
    Bool(bool),
}

impl From<&str> for KeySegment {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&String> for KeySegment {
    fn from(s: &String) -> Self {
        Self::Str(s.clone())
    }
}

impl From<u64> for KeySegment {
    fn from(v: u64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for KeySegment {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Ordered, structurally comparable token identifying one cached query.
///
/// Keys sharing a common prefix form a family that can be addressed
/// together, e.g. every notifications filter at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
    /// Build a key from an ordered sequence of segments.
    pub fn of<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<KeySegment>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Append a segment, returning the extended key.
    pub fn push(mut self, segment: impl Into<KeySegment>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// The ordered segments of this key.
    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    /// Whether this key equals, or is an extension of, `prefix`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no segments (matches every key as a prefix).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<KeySegment>> FromIterator<S> for QueryKey {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::of(iter)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&["notifications"], &["notifications"], true; "exact key")]
    #[test_case(&["notifications"], &["notifications", "inbox"], true; "extension")]
    #[test_case(&["notifications", "inbox"], &["notifications"], false; "parent of prefix")]
    #[test_case(&["notifications", "inbox"], &["notifications", "archived"], false; "sibling")]
    fn prefix_matching(prefix: &[&str], key: &[&str], expected: bool) {
        let prefix = QueryKey::of(prefix.iter().copied());
        let key = QueryKey::of(key.iter().copied());
        assert_eq!(key.starts_with(&prefix), expected);
    }

    #[test]
    fn empty_prefix_matches_everything() {
        let root = QueryKey::default();
        assert!(QueryKey::of(["favorites"]).starts_with(&root));
        assert!(root.starts_with(&root));
    }

    #[test]
    fn mixed_segments_display() {
        let key = QueryKey::of(["posts"]).push(42u64).push(true);
        assert_eq!(key.to_string(), "posts/42/true");
        assert_eq!(key.len(), 3);
    }

    #[test]
    fn structural_equality() {
        let a = QueryKey::of(["threads", "t1"]);
        let b: QueryKey = ["threads", "t1"].into_iter().collect();
        assert_eq!(a, b);
    }
}
