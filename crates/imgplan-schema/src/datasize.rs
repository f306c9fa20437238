//! Human readable data sizes (`"2 GiB"`, `"512MiB"`, `1073741824`).

use crate::SchemaError;
use serde::de::{self, Visitor};
use serde::Deserializer;
use std::fmt;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

const UNITS: &[(&str, u64)] = &[
    ("B", 1),
    ("kB", 1000),
    ("KB", 1000),
    ("KiB", KIB),
    ("MB", 1000 * 1000),
    ("MiB", MIB),
    ("GB", 1000 * 1000 * 1000),
    ("GiB", GIB),
    ("TB", 1000 * 1000 * 1000 * 1000),
    ("TiB", TIB),
];

/// Parse a size string into bytes. A bare number is a byte count.
pub fn parse(input: &str) -> Result<u64, SchemaError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(SchemaError::InvalidSize(input.to_owned()));
    }
    let value: u64 = number
        .parse()
        .map_err(|_| SchemaError::InvalidSize(input.to_owned()))?;
    let unit = unit.trim();
    if unit.is_empty() {
        return Ok(value);
    }
    let multiplier = UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, m)| *m)
        .ok_or_else(|| SchemaError::InvalidSize(input.to_owned()))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| SchemaError::InvalidSize(input.to_owned()))
}

/// Serde adapter accepting either an integer byte count or a size string.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    struct SizeVisitor;

    impl Visitor<'_> for SizeVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte count or a size string such as \"2 GiB\"")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom(format!("negative size {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            parse(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(SizeVisitor)
}
