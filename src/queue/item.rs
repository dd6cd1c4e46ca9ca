//! Work item types for the download queue.

use std::fmt;

/// Classification of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// One media source producing a single output file.
    Single,
    /// A multi-item source (e.g. a playlist) expanded fully on fetch.
    Collection,
}

impl ItemKind {
    /// Returns the string label used in logs and display.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Collection => "collection",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued fetch request.
///
/// Items are immutable once enqueued. Identity is the queue-assigned sequence
/// number, not the URL: two entries may share a URL and remain distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    seq: u64,
    kind: ItemKind,
    url: String,
}

impl WorkItem {
    pub(crate) fn new(seq: u64, kind: ItemKind, url: impl Into<String>) -> Self {
        Self {
            seq,
            kind,
            url: url.into(),
        }
    }

    /// The queue-assigned identity ordinal.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// How this item will be fetched.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// The source URL as supplied by the caller.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns true when `other` refers to the same queue entry.
    #[must_use]
    pub fn same_entry(&self, other: &WorkItem) -> bool {
        self.seq == other.seq
    }
}
