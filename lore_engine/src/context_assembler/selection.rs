//! Priority-first selection under a token budget.

use lorebook::Entry;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::tokens::estimate_cost;

/// An entry that made it into the budget, with the cost charged for it.
#[derive(Debug, Clone, Copy)]
pub struct SelectedEntry<'a> {
    pub entry: &'a Entry,
    pub cost: usize,
}

/// Result of a budgeted selection pass.
#[derive(Debug, Clone, Default)]
pub struct Selection<'a> {
    /// Selected entries in priority order.
    pub entries: Vec<SelectedEntry<'a>>,

    /// Sum of the costs of the selected entries. Never exceeds the budget.
    pub used_tokens: usize,

    /// Entries that were triggered but did not fit.
    pub skipped: usize,
}

impl<'a> Selection<'a> {
    /// The selected entries without their costs.
    pub fn entries(&self) -> Vec<&'a Entry> {
        self.entries.iter().map(|s| s.entry).collect()
    }

    /// Per-entry stats for display.
    pub fn triggered_stats(&self) -> Vec<TriggeredEntry> {
        self.entries
            .iter()
            .map(|s| TriggeredEntry {
                name: s.entry.name.clone(),
                tokens: s.cost,
            })
            .collect()
    }
}

/// Name and charged cost of one injected entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredEntry {
    pub name: String,
    pub tokens: usize,
}

/// Sort by priority (descending), then insertion order (ascending).
///
/// The sort is stable, so entries that tie on both keep their match order.
pub fn rank(entries: &mut [&Entry]) {
    entries.sort_by_key(|e| (Reverse(e.priority), e.insertion_order));
}

/// Greedy, priority-first selection.
///
/// Entries are ranked with [`rank`] and walked once. Each is taken if its
/// [`estimate_cost`] still fits in what is left of `budget`; otherwise it is
/// skipped and the walk continues with the next (lower or equal priority)
/// entry. This is not a knapsack: a large high-priority entry is never traded
/// for several smaller ones, and a skipped entry is never reconsidered.
pub fn select_within_budget<'a>(mut triggered: Vec<&'a Entry>, budget: usize) -> Selection<'a> {
    rank(&mut triggered);

    let mut selection = Selection::default();
    for entry in triggered {
        let cost = estimate_cost(&entry.content);
        if selection.used_tokens + cost <= budget {
            selection.used_tokens += cost;
            selection.entries.push(SelectedEntry { entry, cost });
        } else {
            selection.skipped += 1;
        }
    }
    selection
}

/// Convenience form of [`select_within_budget`] returning only the entries.
pub fn select<'a>(triggered: Vec<&'a Entry>, budget: usize) -> Vec<&'a Entry> {
    select_within_budget(triggered, budget).entries()
}
