//! Repository - persisted lorebooks and the operations over them.
//!
//! All lorebooks live in one JSON array under [`STORAGE_KEY_LOREBOOKS`]. Every
//! operation loads the whole array into a [`LorebookArena`], works on it, and
//! (for mutations) writes it back in one piece.

mod arena;
mod store;

pub use arena::*;
pub use store::*;

use lorebook::{
    CharacterId, Entry, EntryId, EntryPatch, Lorebook, LorebookId, LorebookPatch, NewEntry,
    NewLorebook,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context_assembler::{AssembledLore, ContextAssembler};
use crate::error::{ImportError, RepositoryError};
use crate::import::{character_book_lorebook, extract_card, parse_lorebook, CharacterCard, CharacterProfile};
use crate::tokens::{calculate_context_tokens, ContextStats};

/// Store key holding the JSON array of all lorebooks.
pub const STORAGE_KEY_LOREBOOKS: &str = "lorebooks";

/// Store key holding the id of the designated global lorebook.
pub const STORAGE_KEY_GLOBAL_LOREBOOK: &str = "global_lorebook_id";

/// Result of importing a character card.
#[derive(Debug, Clone)]
pub struct CardImport {
    pub card: CharacterCard,
    pub profile: CharacterProfile,

    /// The card's embedded lorebook, already stored.
    pub lorebook: Option<Lorebook>,
}

/// Lorebook storage plus context building over a [`Store`].
#[derive(Debug, Clone)]
pub struct LorebookRepository<S: Store> {
    store: S,
    assembler: ContextAssembler,
}

impl<S: Store> LorebookRepository<S> {
    /// Create a repository with a default-configured assembler.
    pub fn new(store: S) -> Self {
        Self::with_assembler(store, ContextAssembler::with_defaults())
    }

    pub fn with_assembler(store: S, assembler: ContextAssembler) -> Self {
        Self { store, assembler }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    /// Load every lorebook.
    ///
    /// A blob that is not a JSON array is logged and treated as empty. Inside
    /// the array, each book that fails to decode is logged and set aside; it is
    /// written back unchanged by the next [`save`](Self::save).
    pub fn load(&self) -> Result<LorebookArena, RepositoryError> {
        let Some(json) = self.store.read(STORAGE_KEY_LOREBOOKS)? else {
            return Ok(LorebookArena::new());
        };

        let records = match serde_json::from_str::<Vec<Value>>(&json) {
            Ok(records) => records,
            Err(error) => {
                warn!(%error, "Stored lorebooks are unreadable, starting empty");
                return Ok(LorebookArena::new());
            }
        };

        let mut books = Vec::with_capacity(records.len());
        let mut unreadable = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            match Lorebook::deserialize(&record) {
                Ok(book) => books.push(book),
                Err(error) => {
                    warn!(index, %error, "Skipping unreadable stored lorebook");
                    unreadable.push(record);
                }
            }
        }

        debug!(count = books.len(), skipped = unreadable.len(), "Loaded lorebooks");
        Ok(LorebookArena::from_vec(books).with_unreadable(unreadable))
    }

    /// Persist every lorebook, replacing what was stored. Records the last
    /// load could not decode are appended as they were.
    pub fn save(&mut self, arena: LorebookArena) -> Result<(), RepositoryError> {
        let (books, unreadable) = arena.into_parts();
        let mut records = books
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Value>, _>>()?;
        records.extend(unreadable);

        let json = serde_json::to_string(&records)?;
        self.store.write(STORAGE_KEY_LOREBOOKS, &json)?;
        debug!(count = books.len(), "Saved lorebooks");
        Ok(())
    }

    pub fn all_lorebooks(&self) -> Result<Vec<Lorebook>, RepositoryError> {
        Ok(self.load()?.into_vec())
    }

    pub fn get_lorebook(&self, id: &LorebookId) -> Result<Option<Lorebook>, RepositoryError> {
        Ok(self.load()?.get(id).cloned())
    }

    /// Store a new lorebook under a fresh id.
    pub fn create_lorebook(&mut self, draft: NewLorebook) -> Result<Lorebook, RepositoryError> {
        let book = draft.into_lorebook();
        let mut arena = self.load()?;
        arena.insert(book.clone());
        self.save(arena)?;

        info!(id = %book.id, name = %book.name, "Created lorebook");
        Ok(book)
    }

    /// Returns `Ok(false)` if no such lorebook exists.
    pub fn update_lorebook(
        &mut self,
        id: &LorebookId,
        patch: LorebookPatch,
    ) -> Result<bool, RepositoryError> {
        let mut arena = self.load()?;
        let Some(book) = arena.get_mut(id) else {
            return Ok(false);
        };
        book.apply(patch);
        self.save(arena)?;
        Ok(true)
    }

    /// Returns `Ok(false)` if no such lorebook exists. Deleting the global
    /// lorebook also clears the global designation.
    pub fn delete_lorebook(&mut self, id: &LorebookId) -> Result<bool, RepositoryError> {
        let mut arena = self.load()?;
        if arena.remove(id).is_none() {
            return Ok(false);
        }
        self.save(arena)?;

        if self.global_lorebook_id()?.as_ref() == Some(id) {
            self.store.write(STORAGE_KEY_GLOBAL_LOREBOOK, "")?;
        }
        info!(%id, "Deleted lorebook");
        Ok(true)
    }

    /// Add an entry with a fresh id. Returns `Ok(None)` if the lorebook does
    /// not exist.
    pub fn add_entry(
        &mut self,
        lorebook_id: &LorebookId,
        draft: NewEntry,
    ) -> Result<Option<Entry>, RepositoryError> {
        let mut arena = self.load()?;
        let Some(book) = arena.get_mut(lorebook_id) else {
            return Ok(None);
        };
        let entry = book.add_entry(draft)?.clone();
        self.save(arena)?;
        Ok(Some(entry))
    }

    /// Returns `Ok(false)` if the lorebook or entry does not exist.
    pub fn update_entry(
        &mut self,
        lorebook_id: &LorebookId,
        entry_id: &EntryId,
        patch: EntryPatch,
    ) -> Result<bool, RepositoryError> {
        let mut arena = self.load()?;
        let Some(book) = arena.get_mut(lorebook_id) else {
            return Ok(false);
        };
        if !book.update_entry(entry_id, patch)? {
            return Ok(false);
        }
        self.save(arena)?;
        Ok(true)
    }

    /// Returns `Ok(false)` if the lorebook or entry does not exist.
    pub fn delete_entry(
        &mut self,
        lorebook_id: &LorebookId,
        entry_id: &EntryId,
    ) -> Result<bool, RepositoryError> {
        let mut arena = self.load()?;
        let removed = arena
            .get_mut(lorebook_id)
            .and_then(|book| book.remove_entry(entry_id));
        if removed.is_none() {
            return Ok(false);
        }
        self.save(arena)?;
        Ok(true)
    }

    fn global_lorebook_id(&self) -> Result<Option<LorebookId>, RepositoryError> {
        let id = self.store.read(STORAGE_KEY_GLOBAL_LOREBOOK)?;
        Ok(id
            .filter(|id| !id.is_empty())
            .map(|id| LorebookId::from(id.as_str())))
    }

    /// The designated global lorebook, if one is set and still exists.
    pub fn global_lorebook(&self) -> Result<Option<Lorebook>, RepositoryError> {
        match self.global_lorebook_id()? {
            Some(id) => self.get_lorebook(&id),
            None => Ok(None),
        }
    }

    /// Designate a lorebook as the global one and mark it global. Returns
    /// `Ok(false)` if no such lorebook exists.
    pub fn set_global_lorebook(&mut self, id: &LorebookId) -> Result<bool, RepositoryError> {
        let mut arena = self.load()?;
        let Some(book) = arena.get_mut(id) else {
            return Ok(false);
        };
        book.apply(LorebookPatch {
            is_global: Some(true),
            ..Default::default()
        });

        self.save(arena)?;
        self.store.write(STORAGE_KEY_GLOBAL_LOREBOOK, id.as_str())?;
        Ok(true)
    }

    /// Lorebooks bound to the character plus every global lorebook, in
    /// stored order.
    pub fn character_lorebooks(
        &self,
        character: &CharacterId,
    ) -> Result<Vec<Lorebook>, RepositoryError> {
        Ok(self
            .load()?
            .into_vec()
            .into_iter()
            .filter(|book| book.applies_to(character))
            .collect())
    }

    /// Build the lore block for a character. `max_tokens` defaults to the
    /// assembler's configured budget.
    pub fn build_context(
        &self,
        character: &CharacterId,
        recent_text: &str,
        max_tokens: Option<usize>,
    ) -> Result<String, RepositoryError> {
        Ok(self
            .build_context_with_stats(character, recent_text, max_tokens)?
            .text)
    }

    /// Like [`build_context`](Self::build_context), also reporting which
    /// entries went in and at what cost.
    pub fn build_context_with_stats(
        &self,
        character: &CharacterId,
        recent_text: &str,
        max_tokens: Option<usize>,
    ) -> Result<AssembledLore, RepositoryError> {
        let books = self.character_lorebooks(character)?;
        let budget = max_tokens.unwrap_or(self.assembler.config().max_tokens);
        Ok(self.assembler.build_with_budget(&books, recent_text, budget))
    }

    /// Build the lore block from raw chat messages; each lorebook scans its
    /// own `scan_depth` most recent messages.
    pub fn build_context_for_messages<M: AsRef<str>>(
        &self,
        character: &CharacterId,
        messages: &[M],
        max_tokens: Option<usize>,
    ) -> Result<AssembledLore, RepositoryError> {
        let books = self.character_lorebooks(character)?;
        let budget = max_tokens.unwrap_or(self.assembler.config().max_tokens);
        Ok(self.assembler.build_for_messages(&books, messages, budget))
    }

    /// Build the lore block and token statistics for a full prompt.
    pub fn context_stats<M: AsRef<str>>(
        &self,
        character: &CharacterId,
        system_prompt: &str,
        character_info: Option<&str>,
        messages: &[M],
        context_limit: usize,
    ) -> Result<(AssembledLore, ContextStats), RepositoryError> {
        let lore = self.build_context_for_messages(character, messages, None)?;
        let stats = calculate_context_tokens(
            system_prompt,
            &lore.text,
            messages,
            context_limit,
            character_info,
        );
        Ok((lore, stats))
    }

    /// Pretty-printed internal JSON of one lorebook, or `None` if it does not exist.
    pub fn export_lorebook(&self, id: &LorebookId) -> Result<Option<String>, RepositoryError> {
        match self.get_lorebook(id)? {
            Some(book) => Ok(Some(serde_json::to_string_pretty(&book)?)),
            None => Ok(None),
        }
    }

    /// Import a lorebook file in any recognized format and store it under a
    /// fresh id.
    pub fn import_lorebook(&mut self, json: &str) -> Result<Lorebook, ImportError> {
        let converted = parse_lorebook(json)?;
        if converted.dropped_entries > 0 {
            warn!(
                dropped = converted.dropped_entries,
                "Some imported entries had no trigger keys and were skipped"
            );
        }
        Ok(self.create_lorebook(converted.lorebook)?)
    }

    /// Import a PNG character card, storing its embedded lorebook if present.
    pub fn import_card(&mut self, png: &[u8]) -> Result<CardImport, ImportError> {
        let card = extract_card(png)?;
        let profile = CharacterProfile::from_card(&card)?;

        let lorebook = match character_book_lorebook(&card)? {
            Some(converted) => Some(self.create_lorebook(converted.lorebook)?),
            None => None,
        };

        info!(
            character = %profile.name,
            with_lorebook = lorebook.is_some(),
            "Imported character card"
        );
        Ok(CardImport {
            card,
            profile,
            lorebook,
        })
    }
}
