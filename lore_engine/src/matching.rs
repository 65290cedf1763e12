//! Keyword matching - decides which entries trigger for a window of text.
//!
//! An enabled entry triggers when it is `constant` or when any of its keys
//! matches the text. Keys are tried in order and the first hit wins. A key is
//! either a literal substring or, with `use_regex`, a regex searched anywhere
//! in the text. Case is folded unless the entry is `case_sensitive`.
//!
//! `selective` is carried on entries but never consulted here.

use std::collections::HashMap;

use lorebook::{Entry, EntryId, Lorebook, LorebookId};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::error::MatchError;

/// A key that failed to evaluate, excluding its entry from the match pass.
#[derive(Debug, Clone)]
pub struct MatchWarning {
    pub lorebook_id: LorebookId,
    pub entry_id: EntryId,
    pub entry_name: String,
    pub error: MatchError,
}

/// Result of matching one or more lorebooks against a text.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome<'a> {
    /// Triggered entries in lorebook order. Not ranked.
    pub triggered: Vec<&'a Entry>,

    /// Entries skipped because a key could not be evaluated.
    pub warnings: Vec<MatchWarning>,
}

impl<'a> MatchOutcome<'a> {
    pub fn new() -> Self {
        Self {
            triggered: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Append another outcome (used to union several lorebooks).
    pub fn extend(&mut self, other: MatchOutcome<'a>) {
        self.triggered.extend(other.triggered);
        self.warnings.extend(other.warnings);
    }

    pub fn is_empty(&self) -> bool {
        self.triggered.is_empty()
    }
}

/// State for one matching pass: the case-folded text is built once, and each
/// distinct regex key is compiled once.
struct ScanPass<'t> {
    original: &'t str,
    folded: String,
    regexes: HashMap<(String, bool), Result<Regex, MatchError>>,
}

impl<'t> ScanPass<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            original: text,
            folded: text.to_lowercase(),
            regexes: HashMap::new(),
        }
    }

    fn regex(&mut self, key: &str, case_sensitive: bool) -> Result<&Regex, MatchError> {
        self.regexes
            .entry((key.to_string(), case_sensitive))
            .or_insert_with(|| compile(key, case_sensitive))
            .as_ref()
            .map_err(Clone::clone)
    }

    fn key_matches(
        &mut self,
        key: &str,
        use_regex: bool,
        case_sensitive: bool,
    ) -> Result<bool, MatchError> {
        if use_regex {
            let original = self.original;
            return Ok(self.regex(key, case_sensitive)?.is_match(original));
        }

        if case_sensitive {
            Ok(self.original.contains(key))
        } else {
            Ok(self.folded.contains(&key.to_lowercase()))
        }
    }
}

/// Case-insensitive mode folds Unicode letters, the same as the literal path.
fn compile(key: &str, case_sensitive: bool) -> Result<Regex, MatchError> {
    RegexBuilder::new(key)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| MatchError::InvalidPattern {
            pattern: key.to_string(),
            message: e.to_string(),
        })
}

/// Evaluates entry keys against text.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordMatcher;

impl KeywordMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Match every enabled entry of `lorebook` against `text`.
    ///
    /// A key that fails to evaluate (a malformed regex) excludes its entry and
    /// is reported in [`MatchOutcome::warnings`]; the rest of the pass goes on.
    pub fn match_entries<'a>(&self, lorebook: &'a Lorebook, text: &str) -> MatchOutcome<'a> {
        self.match_book(lorebook, &mut ScanPass::new(text))
    }

    /// Match several lorebooks and union the results. No deduplication: the
    /// same content in two books triggers twice.
    pub fn match_all<'a, I>(&self, lorebooks: I, text: &str) -> MatchOutcome<'a>
    where
        I: IntoIterator<Item = &'a Lorebook>,
    {
        let mut pass = ScanPass::new(text);
        let mut outcome = MatchOutcome::new();
        for lorebook in lorebooks {
            outcome.extend(self.match_book(lorebook, &mut pass));
        }
        outcome
    }

    fn match_book<'a>(&self, lorebook: &'a Lorebook, pass: &mut ScanPass<'_>) -> MatchOutcome<'a> {
        let mut outcome = MatchOutcome::new();

        for entry in lorebook.entries.iter().filter(|e| e.enabled) {
            if entry.constant {
                outcome.triggered.push(entry);
                continue;
            }

            match entry_triggers(entry, pass) {
                Ok(true) => outcome.triggered.push(entry),
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        lorebook = %lorebook.id,
                        entry = %entry.id,
                        %error,
                        "Skipping entry with unusable trigger key"
                    );
                    outcome.warnings.push(MatchWarning {
                        lorebook_id: lorebook.id.clone(),
                        entry_id: entry.id.clone(),
                        entry_name: entry.name.clone(),
                        error,
                    });
                }
            }
        }

        debug!(
            lorebook = %lorebook.id,
            triggered = outcome.triggered.len(),
            skipped = outcome.warnings.len(),
            "Matched lorebook"
        );
        outcome
    }

    /// Whether a single key matches, outside of any lorebook.
    pub fn key_matches(
        &self,
        key: &str,
        use_regex: bool,
        case_sensitive: bool,
        text: &str,
    ) -> Result<bool, MatchError> {
        ScanPass::new(text).key_matches(key, use_regex, case_sensitive)
    }
}

/// Whether an entry's keys trigger on the text. Stops at the first hit or the
/// first unusable key.
fn entry_triggers(entry: &Entry, pass: &mut ScanPass<'_>) -> Result<bool, MatchError> {
    for key in &entry.keys {
        if pass.key_matches(key, entry.use_regex, entry.case_sensitive)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Join the last `depth` messages into the text window scanned for triggers.
pub fn scan_window<S: AsRef<str>>(messages: &[S], depth: usize) -> String {
    let start = messages.len().saturating_sub(depth);
    messages[start..]
        .iter()
        .map(|m| m.as_ref())
        .collect::<Vec<&str>>()
        .join("\n")
}
