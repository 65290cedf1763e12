//! In-memory arena of lorebooks, keyed by id with stable ordering.

use std::collections::HashMap;

use lorebook::{Lorebook, LorebookId};
use serde_json::Value;

/// The full persisted state, loaded for the duration of one operation.
///
/// Books keep the order they were persisted (or inserted) in. Stored records
/// that could not be decoded ride along untouched and are written back after
/// the books.
#[derive(Debug, Clone, Default)]
pub struct LorebookArena {
    order: Vec<LorebookId>,
    books: HashMap<LorebookId, Lorebook>,
    unreadable: Vec<Value>,
}

impl LorebookArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an arena from the persisted list. A repeated id replaces the
    /// earlier book but keeps its slot.
    pub fn from_vec(lorebooks: Vec<Lorebook>) -> Self {
        let mut arena = Self::new();
        for book in lorebooks {
            arena.insert(book);
        }
        arena
    }

    /// Carry stored records that failed to decode.
    pub fn with_unreadable(mut self, records: Vec<Value>) -> Self {
        self.unreadable = records;
        self
    }

    /// Records that failed to decode, in stored order.
    pub fn unreadable(&self) -> &[Value] {
        &self.unreadable
    }

    /// Split into the books in order and the undecodable records.
    pub fn into_parts(mut self) -> (Vec<Lorebook>, Vec<Value>) {
        let unreadable = std::mem::take(&mut self.unreadable);
        (self.into_vec(), unreadable)
    }

    /// Books in order.
    pub fn into_vec(mut self) -> Vec<Lorebook> {
        self.order
            .iter()
            .filter_map(|id| self.books.remove(id))
            .collect()
    }

    pub fn get(&self, id: &LorebookId) -> Option<&Lorebook> {
        self.books.get(id)
    }

    pub fn get_mut(&mut self, id: &LorebookId) -> Option<&mut Lorebook> {
        self.books.get_mut(id)
    }

    /// Insert or replace a book.
    pub fn insert(&mut self, book: Lorebook) {
        if !self.books.contains_key(&book.id) {
            self.order.push(book.id.clone());
        }
        self.books.insert(book.id.clone(), book);
    }

    pub fn remove(&mut self, id: &LorebookId) -> Option<Lorebook> {
        let book = self.books.remove(id)?;
        self.order.retain(|o| o != id);
        Some(book)
    }

    /// Books in order.
    pub fn iter(&self) -> impl Iterator<Item = &Lorebook> {
        self.order.iter().filter_map(|id| self.books.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(arena: &LorebookArena) -> Vec<&str> {
        arena.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn test_order_is_preserved() {
        let arena = LorebookArena::from_vec(vec![
            Lorebook::new("c"),
            Lorebook::new("a"),
            Lorebook::new("b"),
        ]);
        assert_eq!(names(&arena), vec!["c", "a", "b"]);

        let names: Vec<String> = arena.into_vec().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_duplicate_id_keeps_slot() {
        let first = Lorebook::new("first");
        let mut replacement = Lorebook::new("replacement");
        replacement.id = first.id.clone();

        let arena = LorebookArena::from_vec(vec![first, Lorebook::new("other"), replacement]);
        assert_eq!(arena.len(), 2);
        assert_eq!(names(&arena), vec!["replacement", "other"]);
    }

    #[test]
    fn test_remove() {
        let book = Lorebook::new("gone");
        let id = book.id.clone();
        let mut arena = LorebookArena::from_vec(vec![book]);

        assert!(arena.remove(&id).is_some());
        assert!(arena.remove(&id).is_none());
        assert!(arena.is_empty());
        assert!(arena.into_vec().is_empty());
    }
}
