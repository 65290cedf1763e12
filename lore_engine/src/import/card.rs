//! Character card extraction from PNG images.
//!
//! Cards are JSON documents stored Base64-encoded in a `tEXt` chunk with the
//! keyword `chara`. Chunk CRCs are skipped, not verified.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::debug;

use super::external::string_list;
use super::{convert_as, ConvertedLorebook, ImportFormat};
use crate::error::{CardError, ImportError};

/// The eight bytes every PNG file starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// `tEXt` keyword under which cards are stored.
pub const CARD_KEYWORD: &str = "chara";

/// `spec` value identifying a version 2 card.
pub const CARD_V2_SPEC: &str = "chara_card_v2";

/// Whether `bytes` starts with the PNG signature.
pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
}

/// Forward-only reader over a byte slice. Every read is bounds checked and
/// returns `None` rather than reading past the end.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Some(slice)
    }

    /// Read a big-endian `u32`.
    pub fn read_u32_be(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Skip `n` bytes.
    pub fn advance(&mut self, n: usize) -> Option<()> {
        self.read_bytes(n).map(|_| ())
    }
}

/// One PNG chunk. The CRC is consumed but not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub kind: [u8; 4],
    pub data: &'a [u8],
}

impl Chunk<'_> {
    pub fn is(&self, kind: &[u8; 4]) -> bool {
        &self.kind == kind
    }
}

/// Iterator over the chunks following the PNG signature.
///
/// Stops after `IEND`, at the end of the buffer, or at a truncated chunk.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    cursor: ByteCursor<'a>,
    done: bool,
}

impl<'a> Chunks<'a> {
    /// Iterate the chunks of `png`. Returns `None` if the signature is missing.
    pub fn new(png: &'a [u8]) -> Option<Self> {
        if !is_png(png) {
            return None;
        }
        let mut cursor = ByteCursor::new(png);
        cursor.advance(PNG_SIGNATURE.len())?;
        Some(Self {
            cursor,
            done: false,
        })
    }

    fn read_chunk(&mut self) -> Option<Chunk<'a>> {
        let length = usize::try_from(self.cursor.read_u32_be()?).ok()?;
        let kind_bytes = self.cursor.read_bytes(4)?;
        let data = self.cursor.read_bytes(length)?;
        self.cursor.advance(4)?;

        let mut kind = [0u8; 4];
        kind.copy_from_slice(kind_bytes);
        Some(Chunk { kind, data })
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.done || self.cursor.is_empty() {
            return None;
        }
        match self.read_chunk() {
            Some(chunk) => {
                self.done = chunk.is(b"IEND");
                Some(chunk)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Find the value of the first `tEXt` chunk with the given keyword.
pub fn extract_text_chunk(png: &[u8], keyword: &str) -> Result<Option<String>, CardError> {
    let chunks = Chunks::new(png).ok_or(CardError::NotAPng)?;

    for chunk in chunks.filter(|c| c.is(b"tEXt")) {
        let Some(nul) = chunk.data.iter().position(|&b| b == 0) else {
            continue;
        };
        if latin1(&chunk.data[..nul]) == keyword {
            return Ok(Some(latin1(&chunk.data[nul + 1..])));
        }
    }
    Ok(None)
}

/// Character fields shared by both card versions.
///
/// Only `name` matters for import. Every other field tolerates the wrong JSON
/// type: numbers become text and anything else reads as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CardData {
    #[serde(deserialize_with = "text")]
    pub name: String,
    #[serde(deserialize_with = "text")]
    pub description: String,
    #[serde(deserialize_with = "text")]
    pub personality: String,
    #[serde(deserialize_with = "text")]
    pub scenario: String,
    #[serde(deserialize_with = "text")]
    pub first_mes: String,
    #[serde(deserialize_with = "text")]
    pub mes_example: String,
    #[serde(deserialize_with = "optional_text")]
    pub creator_notes: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub system_prompt: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub post_history_instructions: Option<String>,
    #[serde(deserialize_with = "string_list")]
    pub alternate_greetings: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub tags: Vec<String>,
    #[serde(deserialize_with = "optional_text")]
    pub creator: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub character_version: Option<String>,

    /// Embedded lorebook in the external interchange schema.
    pub character_book: Option<Value>,
    #[serde(deserialize_with = "object")]
    pub extensions: Map<String, Value>,
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_text(deserializer)?.unwrap_or_default())
}

fn object<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

/// A decoded character card.
#[derive(Debug, Clone, PartialEq)]
pub enum CharacterCard {
    V2 { spec_version: String, data: CardData },
    V1(CardData),
}

impl CharacterCard {
    /// Classify and decode a parsed card document.
    pub fn from_value(value: Value) -> Result<Self, CardError> {
        let Value::Object(mut object) = value else {
            return Err(CardError::CorruptedCardData(
                "card is not a JSON object".to_string(),
            ));
        };

        if object.get("spec").and_then(Value::as_str) == Some(CARD_V2_SPEC) {
            let spec_version = object
                .get("spec_version")
                .and_then(Value::as_str)
                .unwrap_or("2.0")
                .to_string();
            let data = match object.remove("data") {
                Some(data @ Value::Object(_)) => data,
                _ => {
                    return Err(CardError::CorruptedCardData(
                        "V2 card has no data object".to_string(),
                    ))
                }
            };
            return Ok(Self::V2 {
                spec_version,
                data: decode_data(data)?,
            });
        }

        let has_name = object
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| !name.is_empty());
        if !has_name {
            return Err(CardError::CorruptedCardData(
                "V1 card has no name".to_string(),
            ));
        }
        Ok(Self::V1(decode_data(Value::Object(object))?))
    }

    pub fn data(&self) -> &CardData {
        match self {
            Self::V2 { data, .. } | Self::V1(data) => data,
        }
    }

    pub fn is_v2(&self) -> bool {
        matches!(self, Self::V2 { .. })
    }
}

fn decode_data(value: Value) -> Result<CardData, CardError> {
    CardData::deserialize(value).map_err(|e| CardError::CorruptedCardData(e.to_string()))
}

/// Extract and decode the character card embedded in a PNG.
pub fn extract_card(png: &[u8]) -> Result<CharacterCard, CardError> {
    let encoded = extract_text_chunk(png, CARD_KEYWORD)?.ok_or(CardError::NoEmbeddedCard)?;

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CardError::CorruptedCardData(format!("invalid base64: {e}")))?;
    let json = String::from_utf8(bytes)
        .map_err(|e| CardError::CorruptedCardData(format!("invalid UTF-8: {e}")))?;
    let value: Value = serde_json::from_str(&json).map_err(CardError::InvalidJson)?;

    let card = CharacterCard::from_value(value)?;
    debug!(
        name = %card.data().name,
        v2 = card.is_v2(),
        has_book = card.data().character_book.is_some(),
        "Extracted character card"
    );
    Ok(card)
}

/// Signature used when a card has no personality to excerpt.
pub const DEFAULT_SIGNATURE: &str = "From a character card";

/// Description used when a card has none of description, personality or scenario.
pub const DEFAULT_DESCRIPTION: &str = "This character has no description yet.";

const SIGNATURE_CHARS: usize = 100;

/// A character as the application stores it, derived from a card.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterProfile {
    pub name: String,

    /// Short tagline: the start of the personality.
    pub signature: String,

    /// Description with personality and scenario appended as sections.
    pub description: String,
    pub personality: String,
    pub scenario: String,
    pub first_message: String,
    pub example_messages: String,
    pub system_prompt: Option<String>,
    pub alternate_greetings: Vec<String>,
    pub tags: Vec<String>,
    pub creator: Option<String>,
}

impl CharacterProfile {
    pub fn from_card(card: &CharacterCard) -> Result<Self, CardError> {
        let data = card.data();
        let name = data.name.trim();
        if name.is_empty() {
            return Err(CardError::CorruptedCardData(
                "card has no character name".to_string(),
            ));
        }

        let mut description = data.description.clone();
        if !data.personality.is_empty() {
            description.push_str("\n\n[Personality]\n");
            description.push_str(&data.personality);
        }
        if !data.scenario.is_empty() {
            description.push_str("\n\n[Scenario]\n");
            description.push_str(&data.scenario);
        }
        let description = match description.trim() {
            "" => DEFAULT_DESCRIPTION.to_string(),
            trimmed => trimmed.to_string(),
        };

        let signature = if data.personality.is_empty() {
            DEFAULT_SIGNATURE.to_string()
        } else {
            data.personality.chars().take(SIGNATURE_CHARS).collect()
        };

        Ok(Self {
            name: name.to_string(),
            signature,
            description,
            personality: data.personality.clone(),
            scenario: data.scenario.clone(),
            first_message: data.first_mes.clone(),
            example_messages: data.mes_example.clone(),
            system_prompt: data.system_prompt.clone(),
            alternate_greetings: data.alternate_greetings.clone(),
            tags: data.tags.clone(),
            creator: data.creator.clone(),
        })
    }
}

/// Convert a card's embedded lorebook, if it has one.
///
/// The book is always read with the external converter, whatever its header
/// looks like. A book whose `entries` is neither an array nor an object is
/// treated as absent.
pub fn character_book_lorebook(
    card: &CharacterCard,
) -> Result<Option<ConvertedLorebook>, ImportError> {
    let Some(book) = &card.data().character_book else {
        return Ok(None);
    };

    let format = match book.get("entries") {
        Some(Value::Array(_)) => ImportFormat::ExternalArray,
        Some(Value::Object(_)) => ImportFormat::ExternalMap,
        _ => return Ok(None),
    };

    let mut converted = convert_as(book, format)?;
    let named = book
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| !name.is_empty());
    if !named {
        converted.lorebook.name = format!("{} Lorebook", card.data().name.trim());
    }
    Ok(Some(converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorebook::Position;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    fn text_chunk(keyword: &str, value: &str) -> Vec<u8> {
        let mut data = keyword.as_bytes().to_vec();
        data.push(0);
        data.extend_from_slice(value.as_bytes());
        chunk(b"tEXt", &data)
    }

    fn png(chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        out.extend(chunk(b"IHDR", &[0; 13]));
        for c in chunks {
            out.extend_from_slice(c);
        }
        out.extend(chunk(b"IEND", &[]));
        out
    }

    fn card_png(card: &Value) -> Vec<u8> {
        let encoded = STANDARD.encode(card.to_string());
        png(&[text_chunk("Software", "paint"), text_chunk("chara", &encoded)])
    }

    #[test]
    fn test_byte_cursor_bounds() {
        let mut cursor = ByteCursor::new(&[0, 0, 1, 2, 9]);
        assert_eq!(cursor.read_u32_be(), Some(258));
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.read_u32_be(), None);
        assert_eq!(cursor.read_bytes(2), None);
        assert_eq!(cursor.read_bytes(1), Some(&[9u8][..]));
        assert!(cursor.is_empty());
        assert_eq!(cursor.advance(1), None);
    }

    #[test]
    fn test_chunks_stop_at_iend() {
        let mut bytes = png(&[text_chunk("a", "b")]);
        bytes.extend(chunk(b"tEXt", b"late\0ignored"));

        let kinds: Vec<[u8; 4]> = Chunks::new(&bytes).unwrap().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![*b"IHDR", *b"tEXt", *b"IEND"]);
    }

    #[test]
    fn test_truncated_chunk_ends_stream() {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend(text_chunk("chara", "abc"));
        bytes.extend_from_slice(&[0, 0, 0, 50, b't', b'E', b'X', b't', 1, 2]);

        assert_eq!(Chunks::new(&bytes).unwrap().count(), 1);
        assert_eq!(
            extract_text_chunk(&bytes, "chara").unwrap(),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_not_a_png() {
        assert!(matches!(extract_card(b"GIF89a"), Err(CardError::NotAPng)));
        assert!(matches!(extract_card(&[]), Err(CardError::NotAPng)));
    }

    #[test]
    fn test_png_without_card() {
        let bytes = png(&[text_chunk("Software", "paint")]);
        assert!(matches!(extract_card(&bytes), Err(CardError::NoEmbeddedCard)));
    }

    #[test]
    fn test_corrupted_payloads() {
        let bad_base64 = png(&[text_chunk("chara", "***not base64***")]);
        assert!(matches!(
            extract_card(&bad_base64),
            Err(CardError::CorruptedCardData(_))
        ));

        let bad_json = png(&[text_chunk("chara", &STANDARD.encode("{oops"))]);
        assert!(matches!(
            extract_card(&bad_json),
            Err(CardError::InvalidJson(_))
        ));

        let v2_without_data = card_png(&json!({"spec": "chara_card_v2"}));
        assert!(matches!(
            extract_card(&v2_without_data),
            Err(CardError::CorruptedCardData(_))
        ));

        let v1_without_name = card_png(&json!({"description": "nameless"}));
        assert!(matches!(
            extract_card(&v1_without_name),
            Err(CardError::CorruptedCardData(_))
        ));
    }

    #[test]
    fn test_extract_v2_card() {
        let bytes = card_png(&json!({
            "spec": "chara_card_v2",
            "spec_version": "2.0",
            "data": {
                "name": "  Aria  ",
                "description": "A wandering bard.",
                "personality": "Cheerful",
                "scenario": "A tavern at dusk",
                "first_mes": "Hello!",
                "mes_example": "",
                "tags": ["bard"],
                "alternate_greetings": ["Hi there"]
            }
        }));

        let card = extract_card(&bytes).unwrap();
        assert!(card.is_v2());

        let profile = CharacterProfile::from_card(&card).unwrap();
        assert_eq!(profile.name, "Aria");
        assert_eq!(
            profile.description,
            "A wandering bard.\n\n[Personality]\nCheerful\n\n[Scenario]\nA tavern at dusk"
        );
        assert_eq!(profile.signature, "Cheerful");
        assert_eq!(profile.first_message, "Hello!");
        assert_eq!(profile.tags, vec!["bard".to_string()]);
        assert_eq!(profile.alternate_greetings, vec!["Hi there".to_string()]);
    }

    #[test]
    fn test_extract_v1_card_with_defaults() {
        let bytes = card_png(&json!({"name": "Old", "first_mes": "Hey"}));
        let card = extract_card(&bytes).unwrap();
        assert!(!card.is_v2());

        let profile = CharacterProfile::from_card(&card).unwrap();
        assert_eq!(profile.description, DEFAULT_DESCRIPTION);
        assert_eq!(profile.signature, DEFAULT_SIGNATURE);
    }

    #[test]
    fn test_non_ascii_card_roundtrip() {
        let bytes = card_png(&json!({"name": "龙骑士", "description": "守护者"}));
        let card = extract_card(&bytes).unwrap();
        assert_eq!(card.data().name, "龙骑士");
    }

    #[test]
    fn test_character_book_conversion() {
        let card = CharacterCard::from_value(json!({
            "spec": "chara_card_v2",
            "data": {
                "name": "Aria",
                "character_book": {
                    "entries": [
                        {"keys": ["lute"], "content": "Aria's lute", "enabled": true,
                         "insertion_order": 3, "position": "after_char"},
                        {"keys": [], "content": "dropped"}
                    ]
                }
            }
        }))
        .unwrap();

        let converted = character_book_lorebook(&card).unwrap().unwrap();
        assert_eq!(converted.lorebook.name, "Aria Lorebook");
        assert_eq!(converted.dropped_entries, 1);

        let entry = &converted.lorebook.entries[0];
        assert_eq!(entry.keys, vec!["lute".to_string()]);
        assert_eq!(entry.insertion_order, 3);
        assert_eq!(entry.position, Position::AfterChar);
    }

    #[test]
    fn test_mistyped_optional_fields_are_tolerated() {
        let card = CharacterCard::from_value(json!({
            "spec": "chara_card_v2",
            "data": {"name": "A", "character_version": 1}
        }))
        .unwrap();
        assert_eq!(card.data().character_version, Some("1".to_string()));

        let card = CharacterCard::from_value(json!({
            "spec": "chara_card_v2",
            "data": {
                "name": "B",
                "description": null,
                "creator": {"handle": "someone"},
                "system_prompt": false,
                "tags": "solo",
                "alternate_greetings": ["Hi", 7],
                "extensions": []
            }
        }))
        .unwrap();

        let data = card.data();
        assert_eq!(data.description, "");
        assert_eq!(data.creator, None);
        assert_eq!(data.system_prompt, None);
        assert_eq!(data.tags, vec!["solo".to_string()]);
        assert_eq!(data.alternate_greetings, vec!["Hi".to_string()]);
        assert!(data.extensions.is_empty());
        assert_eq!(CharacterProfile::from_card(&card).unwrap().name, "B");
    }

    #[test]
    fn test_card_without_book() {
        let card = CharacterCard::from_value(json!({"name": "Plain"})).unwrap();
        assert!(character_book_lorebook(&card).unwrap().is_none());
    }
}
