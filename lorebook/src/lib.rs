//! # Lorebook
//!
//! The data model for world-info books: a [`Lorebook`] owns an ordered list of
//! keyword-triggered [`Entry`] snippets, each aimed at one of four insertion
//! [`Position`]s. This crate holds no matching or assembly logic; see
//! `lore_engine` for that.

pub mod book;
pub mod entry;

pub use book::*;
pub use entry::*;
