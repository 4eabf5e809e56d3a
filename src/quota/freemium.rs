//! Freemium enrollment provisioning: an idempotent getter/creator for the
//! auto-renewing free-tier enrollment per (tenant, user, variant).
//!
//! The policy that decides *whether* and *how much* quota a tenant's
//! freemium tier grants is an external collaborator (spec.md §1's
//! "freemium-enrollment auto-provisioning policy... configuration source
//! is out-of-scope"); this module only implements the fixed get-or-create
//! contract against whatever [`FreemiumQuota`] the host supplies.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::bundle::Bundle;
use super::error::{QuotaError, QuotaResult};
use super::model::{Enrollment, EnrollmentRow};

#[derive(Clone, Debug)]
pub struct FreemiumQuota {
    pub period_days: i64,
    pub bundles: Vec<Bundle>,
    pub variant: Option<String>,
}

/// Supplies the freemium quota configuration for a tenant. A tenant with
/// no entry (or a host returning `None`) has freemium provisioning
/// disabled — the selector then simply skips the freemium step.
pub trait FreemiumQuotaSource: Send + Sync {
    fn quota_for(&self, business_name: &str) -> Option<FreemiumQuota>;
}

/// Reads quotas from [`crate::quota::config::FREEMIUM_QUOTAS`], an
/// env-configured JSON map. This is the one concrete source this repo
/// ships; a host with a real plan catalog would supply its own
/// [`FreemiumQuotaSource`] instead.
pub struct StaticFreemiumQuotaSource;

impl FreemiumQuotaSource for StaticFreemiumQuotaSource {
    fn quota_for(&self, business_name: &str) -> Option<FreemiumQuota> {
        super::config::FREEMIUM_QUOTAS.get(business_name).cloned()
    }
}

pub struct FreemiumProvisioner<'a> {
    pool: &'a PgPool,
    source: &'a dyn FreemiumQuotaSource,
}

impl<'a> FreemiumProvisioner<'a> {
    pub fn new(pool: &'a PgPool, source: &'a dyn FreemiumQuotaSource) -> Self {
        Self { pool, source }
    }

    /// Implements spec.md §4.4 steps 1-3. If the request carries a
    /// `variant` that doesn't match the configured quota's variant, no
    /// freemium enrollment is created or returned (spec.md §4.4 closing
    /// note, §9 Open Questions resolution).
    pub async fn get_or_create(
        &self,
        business_name: &str,
        user_id: Uuid,
        variant: Option<&str>,
    ) -> QuotaResult<Option<Enrollment>> {
        let Some(quota) = self.source.quota_for(business_name) else {
            return Ok(None);
        };
        if variant.is_some() && quota.variant.as_deref() != variant {
            return Ok(None);
        }

        let now = Utc::now();
        if let Some(existing) = self.find_active(business_name, user_id, now).await? {
            return Ok(Some(existing));
        }

        // quota_enrollments_active_freemium_uniq (see migrations/) makes this
        // insert idempotent under concurrent callers (spec.md §5): the
        // loser's INSERT ... ON CONFLICT DO NOTHING affects zero rows, and
        // it re-reads the winner's row below.
        let expired_at = now + Duration::days(quota.period_days);
        let bundles = serde_json::to_value(&quota.bundles)
            .map_err(|e| QuotaError::Validation(format!("invalid freemium bundles: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO quota_enrollments (
                uid, business_name, user_id, created_at, updated_at, is_deleted,
                price, invoice_id, acquisition_type, started_at, expired_at, status,
                bundles, variant, due_date, is_paid, meta_data
            ) VALUES (
                $1, $2, $3, $4, $4, FALSE,
                0, NULL, 'freemium', $4, $5, 'active',
                $6, $7, NULL, FALSE, NULL
            )
            ON CONFLICT (business_name, user_id, COALESCE(variant, ''))
                WHERE acquisition_type = 'freemium' AND is_deleted = FALSE AND status = 'active'
                DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(business_name)
        .bind(user_id)
        .bind(now)
        .bind(expired_at)
        .bind(bundles)
        .bind(&quota.variant)
        .execute(self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        self.find_active(business_name, user_id, now)
            .await?
            .map(Some)
            .ok_or_else(|| {
                QuotaError::Conflict("freemium enrollment vanished after insert".to_string())
            })
    }

    async fn find_active(
        &self,
        business_name: &str,
        user_id: Uuid,
        now: chrono::DateTime<Utc>,
    ) -> QuotaResult<Option<Enrollment>> {
        let row = sqlx::query_as::<_, EnrollmentRow>(
            r#"
            SELECT * FROM quota_enrollments
            WHERE business_name = $1
              AND user_id = $2
              AND acquisition_type = 'freemium'
              AND status = 'active'
              AND started_at <= $3
              AND expired_at > $3
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(business_name)
        .bind(user_id)
        .bind(now)
        .fetch_optional(self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        row.map(|r| r.into_enrollment())
            .transpose()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))
    }
}
