//! Lorebook definitions - named collections of entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::entry::{Entry, EntryError, EntryId, EntryPatch, NewEntry};

/// Default number of recent messages scanned for triggers.
pub const DEFAULT_SCAN_DEPTH: usize = 10;

/// Default lorebook-wide token budget.
pub const DEFAULT_TOKEN_BUDGET: usize = 2000;

/// Unique identifier for lorebooks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LorebookId(pub String);

impl LorebookId {
    /// Create a new random lorebook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LorebookId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for LorebookId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for LorebookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a character a lorebook can be bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub String);

impl CharacterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for CharacterId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named collection of keyword-triggered entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lorebook {
    pub id: LorebookId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entries: Vec<Entry>,

    /// How many recent messages are scanned for triggers.
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,

    /// Lorebook-wide token budget.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Reserved. Matching never recurses into triggered content.
    #[serde(default)]
    pub recursive_scanning: bool,

    /// Global books apply to every character.
    #[serde(default)]
    pub is_global: bool,

    /// Characters this book is bound to.
    #[serde(default)]
    pub character_ids: BTreeSet<CharacterId>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

fn default_scan_depth() -> usize {
    DEFAULT_SCAN_DEPTH
}

fn default_token_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

impl Lorebook {
    /// Create an empty lorebook with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        NewLorebook::new(name).into_lorebook()
    }

    /// Whether this book applies to the given character.
    pub fn applies_to(&self, character: &CharacterId) -> bool {
        self.is_global || self.character_ids.contains(character)
    }

    /// Get an entry by ID.
    pub fn entry(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Get a mutable entry by ID.
    pub fn entry_mut(&mut self, id: &EntryId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| &e.id == id)
    }

    /// Validate and append a new entry, returning the stored copy.
    pub fn add_entry(&mut self, draft: NewEntry) -> Result<&Entry, EntryError> {
        let entry = draft.into_entry();
        entry.validate()?;
        self.entries.push(entry);
        self.updated_at = Utc::now();
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Patch an entry in place. Returns `Ok(false)` if no such entry exists.
    ///
    /// The patch is rejected (and the entry left untouched) if the result would
    /// violate the keys invariant.
    pub fn update_entry(&mut self, id: &EntryId, patch: EntryPatch) -> Result<bool, EntryError> {
        let Some(entry) = self.entry_mut(id) else {
            return Ok(false);
        };
        let mut updated = entry.clone();
        updated.apply(patch);
        updated.validate()?;
        *entry = updated;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Remove an entry. Returns the removed entry, if any.
    pub fn remove_entry(&mut self, id: &EntryId) -> Option<Entry> {
        let index = self.entries.iter().position(|e| &e.id == id)?;
        self.updated_at = Utc::now();
        Some(self.entries.remove(index))
    }

    /// Apply a partial update and bump `updated_at`. The id never changes.
    pub fn apply(&mut self, patch: LorebookPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(depth) = patch.scan_depth {
            self.scan_depth = depth;
        }
        if let Some(budget) = patch.token_budget {
            self.token_budget = budget;
        }
        if let Some(recursive) = patch.recursive_scanning {
            self.recursive_scanning = recursive;
        }
        if let Some(is_global) = patch.is_global {
            self.is_global = is_global;
        }
        if let Some(characters) = patch.character_ids {
            self.character_ids = characters;
        }
        self.updated_at = Utc::now();
    }

    /// Number of enabled entries.
    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|e| e.enabled).count()
    }
}

/// A lorebook that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLorebook {
    pub name: String,
    pub description: String,
    pub entries: Vec<Entry>,
    pub scan_depth: usize,
    pub token_budget: usize,
    pub recursive_scanning: bool,
    pub is_global: bool,
    pub character_ids: BTreeSet<CharacterId>,
}

impl NewLorebook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            entries: Vec::new(),
            scan_depth: DEFAULT_SCAN_DEPTH,
            token_budget: DEFAULT_TOKEN_BUDGET,
            recursive_scanning: false,
            is_global: false,
            character_ids: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an already-stamped entry.
    pub fn with_entry(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_scan_depth(mut self, depth: usize) -> Self {
        self.scan_depth = depth;
        self
    }

    pub fn global(mut self) -> Self {
        self.is_global = true;
        self
    }

    /// Bind the book to a character.
    pub fn for_character(mut self, character: CharacterId) -> Self {
        self.character_ids.insert(character);
        self
    }

    /// Stamp the draft with a fresh id and the current time.
    pub fn into_lorebook(self) -> Lorebook {
        let now = Utc::now();
        Lorebook {
            id: LorebookId::new(),
            name: self.name,
            description: self.description,
            entries: self.entries,
            scan_depth: self.scan_depth,
            token_budget: self.token_budget,
            recursive_scanning: self.recursive_scanning,
            is_global: self.is_global,
            character_ids: self.character_ids,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a lorebook. Entries are edited through the entry operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LorebookPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub scan_depth: Option<usize>,
    pub token_budget: Option<usize>,
    pub recursive_scanning: Option<bool>,
    pub is_global: Option<bool>,
    pub character_ids: Option<BTreeSet<CharacterId>>,
}
