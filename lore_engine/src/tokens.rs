//! Token estimation.
//!
//! Two estimators live here:
//!
//! - [`estimate_cost`] is the `ceil(chars / 2)` heuristic the selector charges
//!   against a lorebook's budget.
//! - [`estimate_tokens`] counts CJK ideographs plus whitespace-separated words
//!   and feeds the context statistics shown to users.
//!
//! They give different numbers for the same text and are not interchangeable.

use serde::{Deserialize, Serialize};

/// Default model context window used for statistics.
pub const DEFAULT_CONTEXT_LIMIT: usize = 8000;

/// Selector cost of a piece of content: one token per two characters, rounded up.
pub fn estimate_cost(content: &str) -> usize {
    content.chars().count().div_ceil(2)
}

/// Whether a character is a CJK ideograph.
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

/// Approximate token count: one per CJK ideograph plus one per
/// whitespace-delimited run of the remaining text.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    let rest: String = text.chars().filter(|c| !is_cjk(*c)).collect();
    let words = rest.split_whitespace().count();

    cjk + words
}

/// Token usage of an assembled prompt, broken down by source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    pub system_prompt: usize,
    pub character: usize,
    pub lorebook: usize,
    pub messages: usize,
    pub total: usize,
    pub remaining: usize,
    /// Share of the limit in use, capped at 100.
    pub percentage: f64,
}

/// Aggregate token statistics for one prompt.
pub fn calculate_context_tokens<S: AsRef<str>>(
    system_prompt: &str,
    lorebook_context: &str,
    messages: &[S],
    context_limit: usize,
    character_info: Option<&str>,
) -> ContextStats {
    let system_prompt = estimate_tokens(system_prompt);
    let character = character_info.map(estimate_tokens).unwrap_or(0);
    let lorebook = estimate_tokens(lorebook_context);
    let messages: usize = messages.iter().map(|m| estimate_tokens(m.as_ref())).sum();

    let total = system_prompt + character + lorebook + messages;
    let remaining = context_limit.saturating_sub(total);
    let percentage = if context_limit == 0 {
        if total > 0 {
            100.0
        } else {
            0.0
        }
    } else {
        (total as f64 / context_limit as f64 * 100.0).min(100.0)
    };

    ContextStats {
        system_prompt,
        character,
        lorebook,
        messages,
        total,
        remaining,
        percentage,
    }
}

/// Render a token count for display, e.g. `950` or `1.2k`.
pub fn format_token_count(count: usize) -> String {
    if count >= 1000 {
        format!("{:.1}k", count as f64 / 1000.0)
    } else {
        count.to_string()
    }
}
