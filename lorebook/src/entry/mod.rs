//! Entry definitions - the triggerable snippets inside a lorebook.

mod position;

pub use position::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default priority for entries that do not specify one.
pub const DEFAULT_PRIORITY: i32 = 500;

/// Default advisory per-entry token budget.
pub const DEFAULT_ENTRY_TOKEN_BUDGET: u32 = 200;

/// Identifier of an entry, unique within its lorebook.
///
/// Fresh ids are UUID v4 text; ids read back from storage are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    /// Create a new random entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Violations of the entry invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("entry has no trigger keys and is not constant")]
    MissingKeys,

    #[error("trigger key at index {0} is empty")]
    EmptyKey(usize),
}

/// A keyword-triggered snippet of lore.
///
/// Every field has a default so that partially-specified records (older saves,
/// hand-written import files) still deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entry {
    pub id: EntryId,
    pub name: String,

    /// Trigger keys, scanned in order. Empty only for constant entries.
    pub keys: Vec<String>,

    /// Text injected when the entry triggers.
    pub content: String,
    pub enabled: bool,

    /// Higher wins. Conventionally 0-999.
    pub priority: i32,

    /// Tie-break among equal priorities (ascending).
    pub insertion_order: i32,
    pub case_sensitive: bool,
    pub use_regex: bool,

    /// Advisory only; selection uses the lorebook-wide budget.
    pub token_budget: u32,

    /// Always triggers, regardless of keys.
    pub constant: bool,

    /// Carried for interchange compatibility. Matching never reads it.
    pub selective: bool,
    pub position: Position,
    pub comment: String,
    pub category: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Default for Entry {
    fn default() -> Self {
        NewEntry::default().into_entry()
    }
}

impl Entry {
    /// Check the keys invariant: keys may be empty only for constant entries,
    /// and no key may be blank.
    pub fn validate(&self) -> Result<(), EntryError> {
        if self.keys.is_empty() && !self.constant {
            return Err(EntryError::MissingKeys);
        }
        if let Some(index) = self.keys.iter().position(|k| k.trim().is_empty()) {
            return Err(EntryError::EmptyKey(index));
        }
        Ok(())
    }

    /// Apply a partial update and bump `updated_at`. The id never changes.
    pub fn apply(&mut self, patch: EntryPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(keys) = patch.keys {
            self.keys = keys;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(order) = patch.insertion_order {
            self.insertion_order = order;
        }
        if let Some(case_sensitive) = patch.case_sensitive {
            self.case_sensitive = case_sensitive;
        }
        if let Some(use_regex) = patch.use_regex {
            self.use_regex = use_regex;
        }
        if let Some(budget) = patch.token_budget {
            self.token_budget = budget;
        }
        if let Some(constant) = patch.constant {
            self.constant = constant;
        }
        if let Some(selective) = patch.selective {
            self.selective = selective;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(comment) = patch.comment {
            self.comment = comment;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        self.updated_at = Utc::now();
    }
}

/// An entry that has not been stored yet (no id, no timestamps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewEntry {
    pub name: String,
    pub keys: Vec<String>,
    pub content: String,
    pub enabled: bool,
    pub priority: i32,
    pub insertion_order: i32,
    pub case_sensitive: bool,
    pub use_regex: bool,
    pub token_budget: u32,
    pub constant: bool,
    pub selective: bool,
    pub position: Position,
    pub comment: String,
    pub category: String,
}

impl Default for NewEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            keys: Vec::new(),
            content: String::new(),
            enabled: true,
            priority: DEFAULT_PRIORITY,
            insertion_order: 0,
            case_sensitive: false,
            use_regex: false,
            token_budget: DEFAULT_ENTRY_TOKEN_BUDGET,
            constant: false,
            selective: false,
            position: Position::BeforeChar,
            comment: String::new(),
            category: String::new(),
        }
    }
}

impl NewEntry {
    /// Create a draft with the given content and default settings.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a trigger key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    /// Add multiple trigger keys.
    pub fn with_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_insertion_order(mut self, order: i32) -> Self {
        self.insertion_order = order;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Mark the draft as always-on.
    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Treat keys as regular expressions.
    pub fn regex(mut self) -> Self {
        self.use_regex = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Stamp the draft with a fresh id and the current time.
    pub fn into_entry(self) -> Entry {
        let now = Utc::now();
        Entry {
            id: EntryId::new(),
            name: self.name,
            keys: self.keys,
            content: self.content,
            enabled: self.enabled,
            priority: self.priority,
            insertion_order: self.insertion_order,
            case_sensitive: self.case_sensitive,
            use_regex: self.use_regex,
            token_budget: self.token_budget,
            constant: self.constant,
            selective: self.selective,
            position: self.position,
            comment: self.comment,
            category: self.category,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for an entry. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPatch {
    pub name: Option<String>,
    pub keys: Option<Vec<String>>,
    pub content: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub insertion_order: Option<i32>,
    pub case_sensitive: Option<bool>,
    pub use_regex: Option<bool>,
    pub token_budget: Option<u32>,
    pub constant: Option<bool>,
    pub selective: Option<bool>,
    pub position: Option<Position>,
    pub comment: Option<String>,
    pub category: Option<String>,
}
