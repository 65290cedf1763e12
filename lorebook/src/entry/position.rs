//! Insertion positions for triggered entries.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an entry's content lands in the assembled lore block.
///
/// Buckets are always emitted in declaration order: `Top`, `BeforeChar`,
/// `AfterChar`, `Bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Top,
    #[default]
    BeforeChar,
    AfterChar,
    Bottom,
}

impl Position {
    /// All positions in assembly order.
    pub const ALL: [Position; 4] = [
        Position::Top,
        Position::BeforeChar,
        Position::AfterChar,
        Position::Bottom,
    ];

    /// Map a numeric interchange code (0=after_char, 1=before_char, 2=top, 3=bottom).
    ///
    /// Unknown codes fall back to [`Position::BeforeChar`].
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Position::AfterChar,
            1 => Position::BeforeChar,
            2 => Position::Top,
            3 => Position::Bottom,
            _ => Position::BeforeChar,
        }
    }

    /// Parse a symbolic name. Unknown names fall back to [`Position::BeforeChar`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "top" => Position::Top,
            "before_char" => Position::BeforeChar,
            "after_char" => Position::AfterChar,
            "bottom" => Position::Bottom,
            _ => Position::BeforeChar,
        }
    }

    /// The symbolic name used in persisted JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Top => "top",
            Position::BeforeChar => "before_char",
            Position::AfterChar => "after_char",
            Position::Bottom => "bottom",
        }
    }

    /// Index of this position's bucket in assembly order.
    pub fn bucket(&self) -> usize {
        match self {
            Position::Top => 0,
            Position::BeforeChar => 1,
            Position::AfterChar => 2,
            Position::Bottom => 3,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Accepts symbolic names, numeric codes, and anything else as BeforeChar, so a
// single odd position never rejects a whole imported book.
impl<'de> Deserialize<'de> for Position {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PositionVisitor;

        impl<'de> Visitor<'de> for PositionVisitor {
            type Value = Position;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a position name or numeric position code")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Position, E> {
                Ok(Position::from_name(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Position, E> {
                Ok(Position::from_code(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Position, E> {
                Ok(i64::try_from(v).map_or(Position::BeforeChar, Position::from_code))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Position, E> {
                if v.fract() == 0.0 {
                    Ok(Position::from_code(v as i64))
                } else {
                    Ok(Position::BeforeChar)
                }
            }

            fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Position, E> {
                Ok(Position::BeforeChar)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Position, E> {
                Ok(Position::BeforeChar)
            }
        }

        deserializer.deserialize_any(PositionVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_codes() {
        assert_eq!(Position::from_code(0), Position::AfterChar);
        assert_eq!(Position::from_code(1), Position::BeforeChar);
        assert_eq!(Position::from_code(2), Position::Top);
        assert_eq!(Position::from_code(3), Position::Bottom);
        assert_eq!(Position::from_code(4), Position::BeforeChar);
        assert_eq!(Position::from_code(-1), Position::BeforeChar);
    }

    #[test]
    fn test_position_serializes_symbolically() {
        let json = serde_json::to_string(&Position::AfterChar).unwrap();
        assert_eq!(json, "\"after_char\"");
    }

    #[test]
    fn test_position_lenient_deserialize() {
        let from_code: Position = serde_json::from_str("2").unwrap();
        assert_eq!(from_code, Position::Top);

        let from_name: Position = serde_json::from_str("\"bottom\"").unwrap();
        assert_eq!(from_name, Position::Bottom);

        let unknown: Position = serde_json::from_str("\"sideways\"").unwrap();
        assert_eq!(unknown, Position::BeforeChar);

        let out_of_range: Position = serde_json::from_str("42").unwrap();
        assert_eq!(out_of_range, Position::BeforeChar);
    }

    #[test]
    fn test_bucket_order() {
        let buckets: Vec<_> = Position::ALL.iter().map(|p| p.bucket()).collect();
        assert_eq!(buckets, vec![0, 1, 2, 3]);
    }
}
