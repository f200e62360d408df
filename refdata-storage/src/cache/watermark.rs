//! Freshness watermark for snapshot caches.
//!
//! A watermark is the maximum `modified` timestamp observed across a cache's
//! constituent records, joined child collections included. Comparing the
//! store's current watermark against the cached one is the cheap probe that
//! decides whether a full reload is needed.
//!
//! Two writes committed within the same clock tick produce the same
//! watermark, so a refresh that ran between them misses the second one until
//! the next newer write. Watermarks bound staleness; they do not guarantee
//! consistency.

use refdata_core::Timestamp;
use serde::Serialize;
use std::fmt;

/// A point in a table's modification history.
///
/// `Never` sorts before every timestamp and stands for "no data seen".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum Watermark {
    /// Nothing loaded yet, or the store was empty
    #[default]
    Never,
    At(Timestamp),
}

impl Watermark {
    pub fn never() -> Self {
        Watermark::Never
    }

    pub fn at(timestamp: Timestamp) -> Self {
        Watermark::At(timestamp)
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Watermark::Never)
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Watermark::Never => None,
            Watermark::At(ts) => Some(*ts),
        }
    }

    /// Check if this watermark is strictly newer than another.
    pub fn is_newer_than(&self, other: &Watermark) -> bool {
        self > other
    }

    /// Check if this watermark is at least as fresh as another.
    pub fn is_at_least(&self, other: &Watermark) -> bool {
        self >= other
    }

    /// The later of two watermarks.
    pub fn merge(self, other: Watermark) -> Watermark {
        self.max(other)
    }

    /// The latest of several watermarks (e.g. a parent table and its joins).
    pub fn max_of(watermarks: impl IntoIterator<Item = Watermark>) -> Watermark {
        watermarks
            .into_iter()
            .fold(Watermark::Never, Watermark::merge)
    }
}

impl From<Option<Timestamp>> for Watermark {
    fn from(timestamp: Option<Timestamp>) -> Self {
        timestamp.map(Watermark::At).unwrap_or(Watermark::Never)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Never => write!(f, "never"),
            Watermark::At(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}
