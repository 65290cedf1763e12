//! Conversion from the external interchange schema.
//!
//! Field aliases are kept as separate fields rather than serde aliases so a
//! file carrying both spellings still parses; the converter decides which
//! one wins.

use lorebook::{Entry, NewEntry, NewLorebook, Position, DEFAULT_PRIORITY, DEFAULT_SCAN_DEPTH, DEFAULT_TOKEN_BUDGET};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::{admit, ConvertedLorebook, ImportFormat};
use crate::error::ImportError;

/// Name given to imported books that carry none.
pub const DEFAULT_IMPORT_NAME: &str = "Imported Lorebook";

/// Description given to imported books that carry none.
pub const DEFAULT_IMPORT_DESCRIPTION: &str = "Imported from external format";

/// Top-level fields of an external lorebook file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExternalBook {
    pub name: Option<String>,
    pub description: Option<String>,
    pub scan_depth: Option<f64>,
    #[serde(rename = "scanDepth")]
    pub scan_depth_camel: Option<f64>,
    pub token_budget: Option<f64>,
    #[serde(rename = "tokenBudget")]
    pub token_budget_camel: Option<f64>,
    pub recursive_scanning: Option<bool>,
    #[serde(rename = "recursiveScanning")]
    pub recursive_scanning_camel: Option<bool>,
}

/// One entry of an external lorebook file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExternalEntry {
    #[serde(deserialize_with = "string_list")]
    pub keys: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub key: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub keysecondary: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub secondary_keys: Vec<String>,
    pub content: Option<String>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub disable: Option<bool>,
    pub enabled: Option<bool>,
    pub priority: Option<f64>,
    pub insertion_order: Option<f64>,
    pub order: Option<f64>,
    pub case_sensitive: Option<bool>,
    #[serde(rename = "caseSensitive")]
    pub case_sensitive_camel: Option<bool>,
    pub constant: Option<bool>,
    pub selective: Option<bool>,
    pub position: Option<Position>,
}

/// Accept an array of strings (non-strings skipped), a lone string, or
/// anything else as an empty list.
pub(super) fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Value::String(s) => vec![s],
        _ => Vec::new(),
    })
}

fn to_i32(value: f64) -> i32 {
    // `as` saturates and maps NaN to 0.
    value as i32
}

fn to_usize(value: f64) -> usize {
    value as usize
}

impl ExternalEntry {
    /// Convert into a draft. `index` is the entry's position in the source,
    /// used when no insertion order is given.
    pub fn into_draft(self, index: usize) -> NewEntry {
        let primary = if self.keys.is_empty() { self.key } else { self.keys };
        let keys: Vec<String> = primary
            .into_iter()
            .chain(self.keysecondary)
            .filter(|k| !k.trim().is_empty())
            .collect();

        let enabled = match self.disable {
            Some(true) => false,
            _ => self.enabled.unwrap_or(true),
        };

        let insertion_order = self
            .insertion_order
            .or(self.order)
            .map(to_i32)
            .unwrap_or_else(|| i32::try_from(index).unwrap_or(i32::MAX));

        let comment = self.comment.unwrap_or_default();
        let name = if !comment.is_empty() {
            comment.clone()
        } else {
            match self.name {
                Some(name) if !name.is_empty() => name,
                _ => format!("Entry {}", index + 1),
            }
        };

        NewEntry {
            name,
            keys,
            content: self.content.unwrap_or_default(),
            enabled,
            priority: self.priority.map(to_i32).unwrap_or(DEFAULT_PRIORITY),
            insertion_order,
            case_sensitive: self.case_sensitive == Some(true)
                || self.case_sensitive_camel == Some(true),
            use_regex: false,
            constant: self.constant == Some(true),
            selective: self.selective == Some(true),
            position: self.position.unwrap_or_default(),
            category: self.secondary_keys.into_iter().next().unwrap_or_default(),
            comment,
            ..NewEntry::default()
        }
    }
}

/// Entry objects of an external file in source order. Map values are ordered
/// by numeric key, then by key text for non-numeric keys.
fn source_entries(entries: &Value) -> Vec<&Value> {
    match entries {
        Value::Array(list) => list.iter().collect(),
        Value::Object(map) => ordered_values(map),
        _ => Vec::new(),
    }
}

fn ordered_values(map: &Map<String, Value>) -> Vec<&Value> {
    let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
    pairs.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
    pairs.into_iter().map(|(_, v)| v).collect()
}

pub(super) fn convert_external(
    value: &Value,
    format: ImportFormat,
) -> Result<ConvertedLorebook, ImportError> {
    let header = ExternalBook::deserialize(value)?;

    let mut lorebook = NewLorebook::new(
        header
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_IMPORT_NAME.to_string()),
    )
    .with_description(
        header
            .description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_IMPORT_DESCRIPTION.to_string()),
    )
    .with_scan_depth(
        header
            .scan_depth
            .or(header.scan_depth_camel)
            .map(to_usize)
            .unwrap_or(DEFAULT_SCAN_DEPTH),
    )
    .with_token_budget(
        header
            .token_budget
            .or(header.token_budget_camel)
            .map(to_usize)
            .unwrap_or(DEFAULT_TOKEN_BUDGET),
    );
    lorebook.recursive_scanning =
        header.recursive_scanning == Some(true) || header.recursive_scanning_camel == Some(true);

    let mut dropped_entries = 0;
    let sources = value.get("entries").map(source_entries).unwrap_or_default();
    for (index, source) in sources.into_iter().enumerate() {
        let entry = ExternalEntry::deserialize(source)?;
        match admit(entry.into_draft(index)) {
            Some(entry) => lorebook.entries.push(entry),
            None => dropped_entries += 1,
        }
    }

    Ok(ConvertedLorebook {
        lorebook,
        format,
        dropped_entries,
    })
}

/// Convert a single external entry object, outside of any book.
pub fn convert_external_entry(value: &Value, index: usize) -> Result<Option<Entry>, ImportError> {
    let entry = ExternalEntry::deserialize(value)?;
    Ok(admit(entry.into_draft(index)))
}
