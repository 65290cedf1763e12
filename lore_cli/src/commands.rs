//! Command implementations. Each writes its human-readable output to `out`.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use lore_engine::{
    calculate_context_tokens, estimate_cost, estimate_tokens, format_token_count, is_png,
    KeywordMatcher, LoreConfig, LorebookRepository, Store,
};
use lorebook::{CharacterId, LorebookId, NewLorebook};

pub fn list<S: Store>(repo: &LorebookRepository<S>, out: &mut impl Write) -> anyhow::Result<()> {
    let books = repo.all_lorebooks()?;
    if books.is_empty() {
        writeln!(out, "No lorebooks stored.")?;
        return Ok(());
    }

    for book in books {
        let global = if book.is_global { " [global]" } else { "" };
        writeln!(
            out,
            "{}\t{}\t{}/{} entries enabled{}",
            book.id,
            book.name,
            book.enabled_count(),
            book.entries.len(),
            global
        )?;
    }
    Ok(())
}

pub fn show<S: Store>(
    repo: &LorebookRepository<S>,
    id: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let Some(book) = repo.get_lorebook(&LorebookId::from(id))? else {
        bail!("no lorebook with id '{id}'");
    };

    writeln!(out, "{} ({})", book.name, book.id)?;
    if !book.description.is_empty() {
        writeln!(out, "{}", book.description)?;
    }
    writeln!(
        out,
        "scan depth {}, token budget {}",
        book.scan_depth, book.token_budget
    )?;

    for entry in &book.entries {
        let state = if entry.enabled { "" } else { " (disabled)" };
        let keys = if entry.constant {
            "<constant>".to_string()
        } else {
            entry.keys.join(", ")
        };
        writeln!(
            out,
            "- [{}] {} p{}{}: {}",
            entry.position, entry.name, entry.priority, state, keys
        )?;
    }
    Ok(())
}

pub fn create<S: Store>(
    repo: &mut LorebookRepository<S>,
    config: &LoreConfig,
    name: String,
    description: String,
    character: Option<String>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut draft = NewLorebook::new(name)
        .with_description(description)
        .with_scan_depth(config.context.default_scan_depth)
        .with_token_budget(config.context.default_token_budget);
    if let Some(character) = character {
        draft = draft.for_character(CharacterId::new(character));
    }

    let book = repo.create_lorebook(draft)?;
    writeln!(out, "Created {} ({})", book.name, book.id)?;
    Ok(())
}

pub fn import<S: Store>(
    repo: &mut LorebookRepository<S>,
    file: &Path,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;

    if is_png(&bytes) {
        let imported = repo.import_card(&bytes)?;
        writeln!(out, "Character: {}", imported.profile.name)?;
        match imported.lorebook {
            Some(book) => writeln!(
                out,
                "Imported {} ({}) with {} entries",
                book.name,
                book.id,
                book.entries.len()
            )?,
            None => writeln!(out, "The card has no embedded lorebook.")?,
        }
        return Ok(());
    }

    let json = String::from_utf8(bytes)
        .with_context(|| format!("{} is neither a PNG card nor UTF-8 JSON", file.display()))?;
    let book = repo.import_lorebook(&json)?;
    writeln!(
        out,
        "Imported {} ({}) with {} entries",
        book.name,
        book.id,
        book.entries.len()
    )?;
    Ok(())
}

pub fn export<S: Store>(
    repo: &LorebookRepository<S>,
    id: &str,
    path: Option<&Path>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let Some(json) = repo.export_lorebook(&LorebookId::from(id))? else {
        bail!("no lorebook with id '{id}'");
    };

    match path {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("writing {}", path.display()))?;
            writeln!(out, "Exported to {}", path.display())?;
        }
        None => writeln!(out, "{json}")?,
    }
    Ok(())
}

pub fn set_global<S: Store>(
    repo: &mut LorebookRepository<S>,
    id: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if !repo.set_global_lorebook(&LorebookId::from(id))? {
        bail!("no lorebook with id '{id}'");
    }
    writeln!(out, "{id} is now the global lorebook")?;
    Ok(())
}

pub fn context<S: Store>(
    repo: &LorebookRepository<S>,
    config: &LoreConfig,
    character: &str,
    text: &str,
    budget: Option<usize>,
    stats: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let lore = repo.build_context_with_stats(&CharacterId::from(character), text, budget)?;
    writeln!(out, "{}", lore.text)?;

    if stats {
        writeln!(out)?;
        for entry in &lore.triggered {
            writeln!(out, "  {} ({} tokens)", entry.name, entry.tokens)?;
        }
        for warning in &lore.warnings {
            writeln!(out, "  skipped {}: {}", warning.entry_name, warning.error)?;
        }

        let usage = calculate_context_tokens("", &lore.text, &[text], config.context.context_limit, None);
        writeln!(
            out,
            "budget used {} of {}, context {} / {} ({:.1}%)",
            lore.used_tokens,
            budget.unwrap_or(repo.assembler().config().max_tokens),
            format_token_count(usage.total),
            format_token_count(config.context.context_limit),
            usage.percentage
        )?;
    }
    Ok(())
}

pub fn tokens(text: &str, out: &mut impl Write) -> anyhow::Result<()> {
    writeln!(
        out,
        "{} tokens (selector cost {})",
        estimate_tokens(text),
        estimate_cost(text)
    )?;
    Ok(())
}

/// Report whether one trigger key fires on `text`, with the same rules entries use.
pub fn test_key(
    key: &str,
    text: &str,
    use_regex: bool,
    case_sensitive: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let matched = KeywordMatcher::new().key_matches(key, use_regex, case_sensitive, text)?;
    let verdict = if matched { "matches" } else { "does not match" };
    writeln!(out, "'{key}' {verdict}")?;
    Ok(())
}
