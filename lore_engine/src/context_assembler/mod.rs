//! Context Assembler - turns lorebooks and recent text into an injectable block.
//!
//! The pipeline works as follows:
//! 1. **Match**: every enabled entry of every applicable lorebook is tested
//!    against the recent text (see [`KeywordMatcher`])
//! 2. **Select**: triggered entries are ranked by priority and admitted
//!    greedily while they fit the token budget
//! 3. **Assemble**: selected entries are grouped into position buckets and
//!    concatenated Top, BeforeChar, AfterChar, Bottom

mod selection;

pub use selection::*;

use lorebook::{Entry, Lorebook, Position, DEFAULT_TOKEN_BUDGET};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::matching::{scan_window, KeywordMatcher, MatchOutcome, MatchWarning};

/// Separator between entries within a bucket and between buckets.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Configuration for context assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Token budget applied when the caller does not give one.
    pub max_tokens: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_TOKEN_BUDGET,
        }
    }
}

/// Builds lore blocks from lorebooks.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: AssemblyConfig,
    matcher: KeywordMatcher,
}

impl ContextAssembler {
    /// Create a new context assembler with the given configuration.
    pub fn new(config: AssemblyConfig) -> Self {
        Self {
            config,
            matcher: KeywordMatcher::new(),
        }
    }

    /// Create a context assembler with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(AssemblyConfig::default())
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Match, select, and assemble using the configured budget.
    pub fn build<'a, I>(&self, lorebooks: I, recent_text: &str) -> AssembledLore
    where
        I: IntoIterator<Item = &'a Lorebook>,
    {
        self.build_with_budget(lorebooks, recent_text, self.config.max_tokens)
    }

    /// Match, select, and assemble with an explicit budget.
    pub fn build_with_budget<'a, I>(
        &self,
        lorebooks: I,
        recent_text: &str,
        max_tokens: usize,
    ) -> AssembledLore
    where
        I: IntoIterator<Item = &'a Lorebook>,
    {
        let outcome = self.matcher.match_all(lorebooks, recent_text);
        self.finish(outcome, max_tokens)
    }

    /// Like [`build_with_budget`](Self::build_with_budget), but each lorebook
    /// scans only its own `scan_depth` most recent messages.
    pub fn build_for_messages<'a, I, S>(
        &self,
        lorebooks: I,
        messages: &[S],
        max_tokens: usize,
    ) -> AssembledLore
    where
        I: IntoIterator<Item = &'a Lorebook>,
        S: AsRef<str>,
    {
        let mut outcome = MatchOutcome::new();
        for lorebook in lorebooks {
            let window = scan_window(messages, lorebook.scan_depth);
            outcome.extend(self.matcher.match_entries(lorebook, &window));
        }
        self.finish(outcome, max_tokens)
    }

    fn finish(&self, outcome: MatchOutcome<'_>, max_tokens: usize) -> AssembledLore {
        let triggered_count = outcome.triggered.len();
        let selection = select_within_budget(outcome.triggered, max_tokens);
        let text = assemble(&selection.entries());

        debug!(
            triggered = triggered_count,
            selected = selection.entries.len(),
            skipped = selection.skipped,
            used_tokens = selection.used_tokens,
            budget = max_tokens,
            "Assembled lore context"
        );

        AssembledLore {
            text,
            triggered: selection.triggered_stats(),
            used_tokens: selection.used_tokens,
            warnings: outcome.warnings,
        }
    }
}

/// Group entries by position and concatenate the buckets.
///
/// Within a bucket entries keep the order they have in `selected`. Entries are
/// joined with a blank line, as are non-empty buckets; empty buckets leave no
/// trace.
pub fn assemble(selected: &[&Entry]) -> String {
    let mut buckets: [Vec<&str>; 4] = Default::default();
    for entry in selected {
        buckets[entry.position.bucket()].push(entry.content.as_str());
    }

    Position::ALL
        .iter()
        .map(|p| &buckets[p.bucket()])
        .filter(|bucket| !bucket.is_empty())
        .map(|bucket| bucket.join(BLOCK_SEPARATOR))
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

/// The assembled lore block and what went into it.
#[derive(Debug, Clone, Default)]
pub struct AssembledLore {
    /// Text ready for injection. Empty when nothing triggered or fit.
    pub text: String,

    /// Selected entries with their charged cost, in priority order.
    pub triggered: Vec<TriggeredEntry>,

    /// Total cost charged against the budget.
    pub used_tokens: usize,

    /// Entries skipped because a key could not be evaluated.
    pub warnings: Vec<MatchWarning>,
}

impl AssembledLore {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorebook::NewEntry;
    use pretty_assertions::assert_eq;

    fn scenario_book() -> Lorebook {
        let mut book = Lorebook::new("Scenario");
        book.entries.push(
            NewEntry::new("Dragon lore")
                .with_key("dragon")
                .with_priority(500)
                .with_position(Position::BeforeChar)
                .into_entry(),
        );
        book.entries.push(
            NewEntry::new("World overview")
                .constant()
                .with_priority(100)
                .with_position(Position::Top)
                .into_entry(),
        );
        book
    }

    fn placed(content: &str, position: Position, priority: i32) -> Entry {
        NewEntry::new(content)
            .with_key("k")
            .with_position(position)
            .with_priority(priority)
            .into_entry()
    }

    #[test]
    fn test_scenario_assembly() {
        let book = scenario_book();
        let lore = ContextAssembler::with_defaults().build([&book], "a dragon appeared");

        assert_eq!(lore.text, "World overview\n\nDragon lore");
        assert_eq!(lore.triggered.len(), 2);
        assert_eq!(lore.triggered[0].tokens, 6);
        assert!(lore.warnings.is_empty());
    }

    #[test]
    fn test_bucket_order_and_within_bucket_order() {
        let bottom = placed("bottom", Position::Bottom, 900);
        let after = placed("after", Position::AfterChar, 800);
        let top_first = placed("top-1", Position::Top, 700);
        let before = placed("before", Position::BeforeChar, 600);
        let top_second = placed("top-2", Position::Top, 500);

        let selected = vec![&bottom, &after, &top_first, &before, &top_second];
        assert_eq!(
            assemble(&selected),
            "top-1\n\ntop-2\n\nbefore\n\nafter\n\nbottom"
        );
    }

    #[test]
    fn test_empty_buckets_leave_no_separators() {
        let after = placed("after", Position::AfterChar, 1);
        assert_eq!(assemble(&[&after]), "after");
        assert_eq!(assemble(&[]), "");
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let book = scenario_book();
        let assembler = ContextAssembler::with_defaults();

        let first = assembler.build([&book], "dragon");
        let second = assembler.build([&book], "dragon");
        assert_eq!(first.text.as_bytes(), second.text.as_bytes());
    }

    #[test]
    fn test_budget_trims_lower_priority() {
        let book = scenario_book();
        // "Dragon lore" costs 6, "World overview" costs 7.
        let lore = ContextAssembler::with_defaults().build_with_budget([&book], "dragon", 10);
        assert_eq!(lore.text, "Dragon lore");
        assert_eq!(lore.used_tokens, 6);
    }

    #[test]
    fn test_nothing_triggered() {
        let mut book = Lorebook::new("Quiet");
        book.entries
            .push(NewEntry::new("Dragon lore").with_key("dragon").into_entry());

        let lore = ContextAssembler::with_defaults().build([&book], "a calm day");
        assert!(lore.is_empty());
        assert!(lore.triggered.is_empty());
    }

    #[test]
    fn test_build_for_messages_respects_scan_depth() {
        let mut book = Lorebook::new("Shallow");
        book.scan_depth = 1;
        book.entries
            .push(NewEntry::new("Dragon lore").with_key("dragon").into_entry());

        let assembler = ContextAssembler::with_defaults();
        let old = ["a dragon appeared", "it flew away"];
        assert!(assembler.build_for_messages([&book], &old, 100).is_empty());

        let recent = ["it flew away", "the dragon returned"];
        assert_eq!(
            assembler.build_for_messages([&book], &recent, 100).text,
            "Dragon lore"
        );
    }
}
