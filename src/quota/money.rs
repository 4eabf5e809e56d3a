//! Decimal parsing and rounding helpers for quota/price arithmetic.
//!
//! Quotas and prices never use floats: `rust_decimal::Decimal` gives exact
//! base-10 arithmetic, which is what half-even rounding and equality
//! comparisons in the selector depend on.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::str::FromStr;

/// Fractional digits of precision quota amounts are normalized to.
pub const QUOTA_SCALE: u32 = 9;

/// Round `value` to [`QUOTA_SCALE`] fractional digits using half-even
/// (banker's) rounding, the rule spec.md §3 requires for quota math.
pub fn normalize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QUOTA_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Deserialize a `Decimal` from either a JSON number or a JSON string,
/// normalizing to [`QUOTA_SCALE`]. Mirrors the source's `decimal_amount`
/// coercion (numeric and string quota/price inputs are both accepted).
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    decimal_from_value(&raw)
        .map(normalize)
        .map_err(de::Error::custom)
}

/// Same as [`deserialize_decimal`] but for an `Option<Decimal>` field.
pub fn deserialize_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => decimal_from_value(&value)
            .map(normalize)
            .map(Some)
            .map_err(de::Error::custom),
    }
}

fn decimal_from_value(value: &serde_json::Value) -> Result<Decimal, String> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|e| format!("invalid decimal number: {e}")),
        serde_json::Value::String(s) => {
            Decimal::from_str(s).map_err(|e| format!("invalid decimal string '{s}': {e}"))
        }
        other => Err(format!("expected number or string for decimal, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn normalize_rounds_half_to_even() {
        assert_eq!(
            normalize(dec!(1.0000000005)),
            dec!(1.000000000)
        );
        assert_eq!(
            normalize(dec!(1.0000000015)),
            dec!(1.000000002)
        );
    }

    #[test]
    fn decimal_from_value_accepts_numbers_and_strings() {
        assert_eq!(decimal_from_value(&serde_json::json!(10)).unwrap(), dec!(10));
        assert_eq!(
            decimal_from_value(&serde_json::json!("10.5")).unwrap(),
            dec!(10.5)
        );
        assert!(decimal_from_value(&serde_json::json!(true)).is_err());
    }
}
