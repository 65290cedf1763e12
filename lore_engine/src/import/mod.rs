//! Lorebook import - format detection and conversion into the internal model.
//!
//! Import files come in three shapes:
//! - **Internal**: what [`export`](crate::LorebookRepository::export_lorebook)
//!   writes (`name` plus an `entries` array of internal records)
//! - **ExternalArray**: interchange files whose `entries` is an array of
//!   objects with `content` and `keys`/`key`
//! - **ExternalMap**: the same entries keyed by uid in an object
//!
//! [`detect_format`] picks the shape once; each shape has its own converter.
//! Converted books and entries always get fresh ids.

mod card;
mod external;

pub use card::*;
pub use external::*;

use external::convert_external;

use lorebook::{Entry, NewEntry, NewLorebook, DEFAULT_SCAN_DEPTH, DEFAULT_TOKEN_BUDGET};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ImportError;

/// Entry fields that only appear in the external interchange schema.
const EXTERNAL_ONLY_FIELDS: [&str; 4] = ["key", "keysecondary", "disable", "order"];

/// Shape of an import file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Internal,
    ExternalArray,
    ExternalMap,
}

/// A converted, not yet stored, lorebook.
#[derive(Debug, Clone)]
pub struct ConvertedLorebook {
    pub lorebook: NewLorebook,
    pub format: ImportFormat,

    /// Source entries discarded because they had no usable trigger keys.
    pub dropped_entries: usize,
}

/// Work out which shape a parsed import file has, if any.
pub fn detect_format(value: &Value) -> Option<ImportFormat> {
    let object = value.as_object()?;
    let entries = object.get("entries")?;

    let has_name = object
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| !name.is_empty());
    if has_name {
        if let Some(list) = entries.as_array() {
            if !list.iter().any(uses_external_fields) {
                return Some(ImportFormat::Internal);
            }
        }
    }

    match entries {
        Value::Array(list) if !list.is_empty() && list.iter().all(is_external_entry) => {
            Some(ImportFormat::ExternalArray)
        }
        Value::Object(map) if !map.is_empty() && map.values().all(is_external_entry) => {
            Some(ImportFormat::ExternalMap)
        }
        _ => None,
    }
}

fn uses_external_fields(entry: &Value) -> bool {
    entry
        .as_object()
        .is_some_and(|o| EXTERNAL_ONLY_FIELDS.iter().any(|f| o.contains_key(*f)))
}

fn is_external_entry(entry: &Value) -> bool {
    entry.as_object().is_some_and(|o| {
        o.contains_key("content") && (o.contains_key("keys") || o.contains_key("key"))
    })
}

/// Parse and convert an import file.
pub fn parse_lorebook(json: &str) -> Result<ConvertedLorebook, ImportError> {
    let value: Value = serde_json::from_str(json)?;
    convert(&value)
}

/// Detect the shape of `value` and convert it.
pub fn convert(value: &Value) -> Result<ConvertedLorebook, ImportError> {
    let format = detect_format(value).ok_or(ImportError::UnrecognizedFormat)?;
    convert_as(value, format)
}

/// Convert `value` as the given shape, skipping detection.
pub fn convert_as(value: &Value, format: ImportFormat) -> Result<ConvertedLorebook, ImportError> {
    let converted = match format {
        ImportFormat::Internal => convert_internal(value)?,
        ImportFormat::ExternalArray | ImportFormat::ExternalMap => {
            convert_external(value, format)?
        }
    };

    debug!(
        ?format,
        entries = converted.lorebook.entries.len(),
        dropped = converted.dropped_entries,
        "Converted lorebook"
    );
    Ok(converted)
}

/// An internal export file. Ids and timestamps in the file are ignored.
#[derive(Debug, Deserialize)]
struct InternalBookFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    entries: Vec<NewEntry>,
    #[serde(default = "default_scan_depth")]
    scan_depth: usize,
    #[serde(default = "default_token_budget")]
    token_budget: usize,
    #[serde(default)]
    recursive_scanning: bool,
}

fn default_scan_depth() -> usize {
    DEFAULT_SCAN_DEPTH
}

fn default_token_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

fn convert_internal(value: &Value) -> Result<ConvertedLorebook, ImportError> {
    let file = InternalBookFile::deserialize(value)?;

    let mut lorebook = NewLorebook::new(file.name)
        .with_description(file.description)
        .with_scan_depth(file.scan_depth)
        .with_token_budget(file.token_budget);
    lorebook.recursive_scanning = file.recursive_scanning;

    let mut dropped_entries = 0;
    for draft in file.entries {
        match admit(draft) {
            Some(entry) => lorebook.entries.push(entry),
            None => dropped_entries += 1,
        }
    }

    Ok(ConvertedLorebook {
        lorebook,
        format: ImportFormat::Internal,
        dropped_entries,
    })
}

/// Stamp a draft with a fresh id, dropping blank keys. Returns `None` (and
/// logs) if what remains violates the entry invariants.
fn admit(mut draft: NewEntry) -> Option<Entry> {
    draft.keys.retain(|k| !k.trim().is_empty());
    let entry = draft.into_entry();
    match entry.validate() {
        Ok(()) => Some(entry),
        Err(error) => {
            warn!(name = %entry.name, %error, "Dropping imported entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorebook::Position;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_detect_internal() {
        let value = json!({
            "name": "Realm",
            "entries": [{"id": "entry_1", "keys": ["dragon"], "content": "Dragon lore"}]
        });
        assert_eq!(detect_format(&value), Some(ImportFormat::Internal));

        let empty = json!({"name": "Empty", "entries": []});
        assert_eq!(detect_format(&empty), Some(ImportFormat::Internal));
    }

    #[test]
    fn test_detect_external_array() {
        let value = json!({
            "entries": [{"key": ["dragon"], "content": "Dragon lore"}]
        });
        assert_eq!(detect_format(&value), Some(ImportFormat::ExternalArray));

        let named = json!({
            "name": "Named",
            "entries": [{"key": ["dragon"], "content": "Dragon lore", "order": 3}]
        });
        assert_eq!(detect_format(&named), Some(ImportFormat::ExternalArray));
    }

    #[test]
    fn test_detect_external_map() {
        let value = json!({
            "entries": {
                "0": {"key": ["dragon"], "content": "Dragon lore"},
                "1": {"keys": ["elf"], "content": "Elf lore"}
            }
        });
        assert_eq!(detect_format(&value), Some(ImportFormat::ExternalMap));
    }

    #[test]
    fn test_detect_unrecognized() {
        assert_eq!(detect_format(&json!([1, 2, 3])), None);
        assert_eq!(detect_format(&json!({"name": "No entries"})), None);
        assert_eq!(detect_format(&json!({"entries": []})), None);
        assert_eq!(detect_format(&json!({"entries": {}})), None);
        assert_eq!(
            detect_format(&json!({"entries": [{"content": "no keys"}]})),
            None
        );
    }

    #[test]
    fn test_unrecognized_is_an_error_not_a_panic() {
        assert!(matches!(
            parse_lorebook(r#"{"hello": "world"}"#),
            Err(ImportError::UnrecognizedFormat)
        ));
        assert!(matches!(
            parse_lorebook("not json"),
            Err(ImportError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_internal_conversion_renews_ids() {
        let value = json!({
            "name": "Realm",
            "description": "A realm",
            "scan_depth": 4,
            "entries": [
                {"id": "entry_1", "keys": ["dragon", " "], "content": "Dragon lore",
                 "priority": 700, "position": "top", "enabled": false},
                {"id": "entry_2", "keys": [], "content": "Keyless"},
                {"id": "entry_3", "keys": [], "content": "Always", "constant": true}
            ]
        });

        let converted = convert(&value).unwrap();
        let book = converted.lorebook;

        assert_eq!(converted.format, ImportFormat::Internal);
        assert_eq!(converted.dropped_entries, 1);
        assert_eq!(book.name, "Realm");
        assert_eq!(book.scan_depth, 4);
        assert_eq!(book.token_budget, DEFAULT_TOKEN_BUDGET);
        assert_eq!(book.entries.len(), 2);

        let dragon = &book.entries[0];
        assert_ne!(dragon.id.as_str(), "entry_1");
        assert_eq!(dragon.keys, vec!["dragon".to_string()]);
        assert_eq!(dragon.priority, 700);
        assert_eq!(dragon.position, Position::Top);
        assert!(!dragon.enabled);
        assert!(book.entries[1].constant);
    }
}
