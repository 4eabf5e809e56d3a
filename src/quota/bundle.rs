//! Bundle value object and the pure find/deduct operations over bundle lists.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::{deserialize_decimal, normalize};

/// A grant of a specific quantity of one asset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub asset: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub quota: Decimal,
}

impl Bundle {
    pub fn new(asset: impl Into<String>, quota: Decimal) -> Self {
        Self {
            asset: asset.into(),
            quota: normalize(quota),
        }
    }
}

/// First position in `bundles` whose asset matches `asset`, if any.
pub fn find(bundles: &[Bundle], asset: &str) -> Option<usize> {
    bundles.iter().position(|b| b.asset == asset)
}

/// Deduct `amount` from the bundle matching `asset`.
///
/// - No matching bundle: no-op, returns `(0, bundles.to_vec())`.
/// - Matching bundle covers `amount`: quota reduced by `amount`, `used = amount`.
/// - Matching bundle is insufficient: bundle removed entirely, `used` is
///   whatever quota it held (the caller applies the residual elsewhere).
///
/// Pure: `bundles` is never mutated, a new `Vec` is always returned.
pub fn deduct(bundles: &[Bundle], asset: &str, amount: Decimal) -> (Decimal, Vec<Bundle>) {
    let Some(index) = find(bundles, asset) else {
        return (Decimal::ZERO, bundles.to_vec());
    };

    let existing = &bundles[index];
    if existing.quota >= amount {
        let mut next = bundles.to_vec();
        next[index].quota = normalize(existing.quota - amount);
        (amount, next)
    } else {
        let used = existing.quota;
        let mut next = bundles.to_vec();
        next.remove(index);
        (used, next)
    }
}

/// True iff the asset set of `leftover` is a subset of `original`'s asset
/// set, dropping only assets whose quota reached zero (spec.md §3).
pub fn is_valid_leftover(original: &[Bundle], leftover: &[Bundle]) -> bool {
    leftover.iter().all(|b| find(original, &b.asset).is_some())
}

/// Duplicate asset keys within a bundle list must be rejected on enrollment
/// create (spec.md §3 invariant).
pub fn has_duplicate_assets(bundles: &[Bundle]) -> bool {
    let mut seen = std::collections::HashSet::new();
    !bundles.iter().all(|b| seen.insert(b.asset.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bundles() -> Vec<Bundle> {
        vec![
            Bundle::new("image", dec!(10)),
            Bundle::new("text", dec!(10)),
        ]
    }

    #[test]
    fn find_locates_matching_asset() {
        assert_eq!(find(&bundles(), "text"), Some(1));
        assert_eq!(find(&bundles(), "missing"), None);
    }

    #[test]
    fn deduct_reduces_when_sufficient() {
        let (used, next) = deduct(&bundles(), "image", dec!(3));
        assert_eq!(used, dec!(3));
        assert_eq!(find(&next, "image").map(|i| next[i].quota), Some(dec!(7)));
        // original untouched
        assert_eq!(find(&bundles(), "image").map(|i| bundles()[i].quota), Some(dec!(10)));
    }

    #[test]
    fn deduct_drops_bundle_when_insufficient() {
        let (used, next) = deduct(&bundles(), "image", dec!(15));
        assert_eq!(used, dec!(10));
        assert_eq!(find(&next, "image"), None);
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn deduct_is_noop_for_missing_asset() {
        let (used, next) = deduct(&bundles(), "video", dec!(5));
        assert_eq!(used, Decimal::ZERO);
        assert_eq!(next, bundles());
    }

    #[test]
    fn duplicate_asset_detection() {
        assert!(has_duplicate_assets(&[
            Bundle::new("image", dec!(1)),
            Bundle::new("image", dec!(2)),
        ]));
        assert!(!has_duplicate_assets(&bundles()));
    }
}
