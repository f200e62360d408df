//! Reference data record structures

use crate::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// A localized display name attached to a record.
///
/// Names live in their own child collection in the backing store and carry
/// their own modification timestamp, so a translation-only edit advances the
/// store watermark without touching the parent row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedName {
    /// Language tag (e.g. "en", "de-CH")
    pub language: String,
    pub name: String,
    pub modified: Timestamp,
}

impl LocalizedName {
    pub fn new(language: impl Into<String>, name: impl Into<String>, modified: Timestamp) -> Self {
        Self {
            language: language.into(),
            name: name.into(),
            modified,
        }
    }
}

/// A versioned reference data item.
///
/// `modified` is non-decreasing per logical update of the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: EntityId,
    /// Stable business code (e.g. "CH", "01.11"), absent for code-less rows
    pub code: Option<String>,
    pub modified: Timestamp,
    /// Parent record in a hierarchy, `None` for roots and flat tables
    pub parent_id: Option<EntityId>,
    #[serde(default)]
    pub names: Vec<LocalizedName>,
}

impl Record {
    /// Create a bare record with no code, parent or names.
    pub fn new(id: EntityId, modified: Timestamp) -> Self {
        Self {
            id,
            code: None,
            modified,
            parent_id: None,
            names: Vec::new(),
        }
    }

    /// Set the business code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the parent record.
    pub fn with_parent(mut self, parent_id: EntityId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Attach a localized name stamped with the record's own `modified`.
    pub fn with_name(mut self, language: impl Into<String>, name: impl Into<String>) -> Self {
        let modified = self.modified;
        self.names.push(LocalizedName::new(language, name, modified));
        self
    }

    /// Name in the requested language, falling back to the first name.
    pub fn name_for(&self, language: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.language.eq_ignore_ascii_case(language))
            .or_else(|| self.names.first())
            .map(|n| n.name.as_str())
    }

    /// Latest modification across the row and its localized names.
    pub fn effective_modified(&self) -> Timestamp {
        self.names
            .iter()
            .map(|n| n.modified)
            .fold(self.modified, |acc, m| acc.max(m))
    }

    /// Hierarchy level derived from code length, `None` without a code.
    pub fn level(&self) -> Option<usize> {
        self.code.as_deref().map(|c| c.chars().count())
    }
}
