//! # Lore Engine
//!
//! Decides which lorebook entries are relevant to a window of conversation,
//! fits them into a token budget, and assembles them into a position-ordered
//! block of text for injection into a prompt.
//!
//! ## Core Components
//!
//! - **tokens**: Cheap token estimation and aggregate context statistics
//! - **matching**: Keyword and regex triggering of entries
//! - **context_assembler**: Priority-first budget selection and bucketed assembly
//! - **repository**: Load/save of lorebooks over a pluggable [`Store`]
//! - **import**: Format detection for external lorebook files and PNG character cards
//!
//! ## Pipeline
//!
//! `match -> select -> assemble`: every step is synchronous and pure over its
//! inputs; only the repository touches storage.

pub mod config;
pub mod context_assembler;
pub mod error;
pub mod import;
pub mod matching;
pub mod repository;
pub mod tokens;

pub use config::*;
pub use context_assembler::*;
pub use error::*;
pub use import::*;
pub use matching::*;
pub use repository::*;
pub use tokens::*;
