//! Resource quantities
//!
//! Kubernetes-style quantity strings (`500m`, `128Mi`, `1.5`, `2e3`) used for
//! CPU and memory limits. Values are validated on parse and kept in their
//! original textual form so they round-trip unchanged to the API server.

use crate::error::SpecError;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 9] = ["n", "u", "m", "k", "M", "G", "T", "P", "E"];

/// A validated resource quantity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quantity(String);

impl Quantity {
    /// Parse and validate a quantity string.
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !is_valid_quantity(trimmed) {
            return Err(SpecError::InvalidQuantity(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The quantity as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Quantity {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for Quantity {
    fn schema_name() -> Cow<'static, str> {
        "Quantity".into()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "string",
            "description": "Resource quantity, e.g. 500m, 128Mi, 1.5"
        })
    }
}

/// `<sign><digits>[.<digits>]<suffix>` where suffix is binary SI, decimal SI,
/// or a decimal exponent (`e3`, `E-2`).
fn is_valid_quantity(s: &str) -> bool {
    let (number, suffix) = split_number(s);
    if !is_valid_number(number) {
        return false;
    }
    if suffix.is_empty()
        || BINARY_SUFFIXES.contains(&suffix)
        || DECIMAL_SUFFIXES.contains(&suffix)
    {
        return true;
    }
    match suffix.strip_prefix(['e', 'E']) {
        Some(exponent) => {
            let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

fn split_number(s: &str) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-'))))
        .map_or(s.len(), |(i, _)| i);
    s.split_at(end)
}

fn is_valid_number(number: &str) -> bool {
    let unsigned = number.strip_prefix(['+', '-']).unwrap_or(number);
    let mut parts = unsigned.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();
    if fraction.is_some_and(|f| f.contains('.')) {
        return false;
    }
    match fraction {
        Some(f) => !(whole.is_empty() && f.is_empty()),
        None => !whole.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_quantities() {
        for raw in ["1", "0.5", "500m", "128Mi", "1Gi", "2k", "1e3", "1.5E-2", "+3", ".5"] {
            assert!(Quantity::parse(raw).is_ok(), "expected {raw} to parse");
        }
    }

    #[test]
    fn test_rejects_garbage() {
        for raw in ["", "abc", "1.2.3", "12Zi", "m", "1e", "1 Gi", "Mi128", "."] {
            assert!(
                matches!(Quantity::parse(raw), Err(SpecError::InvalidQuantity(_))),
                "expected {raw} to be rejected"
            );
        }
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Quantity = serde_json::from_str("\"250m\"").unwrap();
        assert_eq!(ok.as_str(), "250m");

        let err = serde_json::from_str::<Quantity>("\"lots\"");
        assert!(err.is_err());
    }
}
