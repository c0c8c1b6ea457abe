//! Value shapes for paginated (infinite) queries.

use serde::{Deserialize, Serialize};

/// Opaque continuation token handed back by the server.
///
/// The cache never derives or inspects cursors; it only carries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One fetched page of a paginated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items in fetch order.
    pub items: Vec<T>,
    /// Continuation token for the page after this one, if any.
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// A page with the given items and continuation token.
    pub fn new(items: Vec<T>, next_cursor: Option<Cursor>) -> Self {
        Self { items, next_cursor }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

/// Ordered sequence of pages for one paginated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Pages in fetch order.
    pub pages: Vec<Page<T>>,
}

impl<T> Paginated<T> {
    /// An empty paginated value with no pages.
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// A single page holding `items` with no continuation.
    pub fn single(items: Vec<T>) -> Self {
        Self {
            pages: vec![Page::new(items, None)],
        }
    }

    /// Iterate every item across all pages, in order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    /// Total item count across all pages.
    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|page| page.items.len()).sum()
    }
}

impl<T> Default for Paginated<T> {
    fn default() -> Self {
        Self::new()
    }
}
