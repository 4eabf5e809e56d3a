//! Env-driven configuration knobs, mirroring `crate::config`'s
//! `once_cell::sync::Lazy` statics.

use once_cell::sync::Lazy;

use super::bundle::Bundle;
use super::freemium::FreemiumQuota;

/// Upper bound on `limit` for paginated enrollment/usage listings
/// (spec.md §4.7). Defaults to 100.
pub static PAGE_MAX_LIMIT: Lazy<i64> = Lazy::new(|| {
    std::env::var("QUOTA_PAGE_MAX_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100)
});

/// JSON-encoded map of `business_name -> FreemiumQuota`, the out-of-scope
/// "configuration source" spec.md §1 defers to the host. Empty/unset means
/// freemium provisioning is disabled for every tenant (spec.md §4.4).
///
/// Expected shape:
/// `{"acme": {"period_days": 30, "variant": null, "bundles": [{"asset": "token", "quota": 20}]}}`
pub static FREEMIUM_QUOTAS_JSON: Lazy<String> =
    Lazy::new(|| std::env::var("QUOTA_FREEMIUM_QUOTAS_JSON").unwrap_or_default());

#[derive(Clone, Debug, serde::Deserialize)]
struct RawFreemiumQuota {
    period_days: i64,
    #[serde(default)]
    variant: Option<String>,
    bundles: Vec<Bundle>,
}

/// Parses [`FREEMIUM_QUOTAS_JSON`] once. Invalid/missing config degrades to
/// "no tenant has a freemium quota" rather than failing startup, since
/// freemium provisioning is an optional feature (spec.md §4.4).
pub static FREEMIUM_QUOTAS: Lazy<std::collections::HashMap<String, FreemiumQuota>> =
    Lazy::new(|| {
        if FREEMIUM_QUOTAS_JSON.is_empty() {
            return std::collections::HashMap::new();
        }
        let raw: std::collections::HashMap<String, RawFreemiumQuota> =
            match serde_json::from_str(&FREEMIUM_QUOTAS_JSON) {
                Ok(map) => map,
                Err(error) => {
                    tracing::warn!(%error, "invalid QUOTA_FREEMIUM_QUOTAS_JSON, disabling freemium");
                    return std::collections::HashMap::new();
                }
            };
        raw.into_iter()
            .map(|(business, quota)| {
                (
                    business,
                    FreemiumQuota {
                        period_days: quota.period_days,
                        variant: quota.variant,
                        bundles: quota.bundles,
                    },
                )
            })
            .collect()
    });
