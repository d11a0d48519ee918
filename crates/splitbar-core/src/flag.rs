//! Truthy-string coercion for loosely typed flags.
//!
//! Flags reach us as real booleans (JSON, TOML), as numbers, or as strings
//! such as `"1"`, `"true"`, `"0"` or `""` (environment variables, legacy
//! admin forms). Every such flag goes through [`parse_truthy`].

use serde::{Deserialize, Deserializer};

/// Interpret a string flag. `1`, `true`, `yes` and `on` (case-insensitive,
/// surrounding whitespace ignored) are true; everything else is false.
pub fn parse_truthy(raw: &str) -> bool {
  matches!(
    raw.trim().to_ascii_lowercase().as_str(),
    "1" | "true" | "yes" | "on"
  )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseFlag {
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
}

/// Serde adapter: `#[serde(deserialize_with = "flag::deserialize_truthy")]`.
pub fn deserialize_truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match LooseFlag::deserialize(deserializer)? {
    LooseFlag::Bool(b) => b,
    LooseFlag::Int(i) => i != 0,
    LooseFlag::Float(f) => f != 0.0,
    LooseFlag::Text(s) => parse_truthy(&s),
  })
}
