//! Enrollment persistence: creation, scoped reads, and the `find_active`
//! query the selector depends on.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::bundle::has_duplicate_assets;
use super::error::{QuotaError, QuotaResult};
use super::model::{
    AcquisitionType, Enrollment, EnrollmentCreate, EnrollmentRow, EnrollmentStatus,
    PaginatedResponse, Scope,
};

/// Enrollment persistence and the active-enrollment lookup the selector
/// consults. Abstracted as a trait (mirroring `keys::service::ProviderKeyStore`)
/// so the selector's pure algorithm can be unit-tested against an in-memory
/// implementation without a database.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn create(&self, scope: &Scope, data: EnrollmentCreate) -> QuotaResult<Enrollment>;
    async fn get(&self, scope: &Scope, uid: Uuid) -> QuotaResult<Enrollment>;
    async fn list(
        &self,
        scope: &Scope,
        offset: i64,
        limit: i64,
    ) -> QuotaResult<PaginatedResponse<Enrollment>>;
    /// Always rejected — deletions happen by natural expiry (spec.md §4.7).
    async fn soft_delete(&self, _scope: &Scope, _uid: Uuid) -> QuotaResult<()> {
        Err(QuotaError::NotImplemented)
    }
    /// Active enrollments matching `(tenant, user, asset, variant)`, in the
    /// priority order spec.md §4.2 defines: variant-tagged before
    /// variant-agnostic, finite expiry before never-expires, soonest expiry
    /// first, `uid` ascending tiebreak.
    async fn find_active(
        &self,
        business_name: &str,
        user_id: Uuid,
        asset: &str,
        variant: Option<&str>,
        enrollment_id: Option<Uuid>,
    ) -> QuotaResult<Vec<Enrollment>>;
}

#[derive(Clone)]
pub struct PostgresEnrollmentStore {
    pool: PgPool,
}

impl PostgresEnrollmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn enforce_scope(scope: &Scope, enrollment: &Enrollment) -> QuotaResult<()> {
    if enrollment.business_name != scope.business_name {
        return Err(QuotaError::NotFound);
    }
    if let Some(user_id) = scope.user_id {
        if enrollment.user_id != user_id {
            return Err(QuotaError::NotFound);
        }
    }
    Ok(())
}

#[async_trait]
impl EnrollmentStore for PostgresEnrollmentStore {
    async fn create(&self, scope: &Scope, data: EnrollmentCreate) -> QuotaResult<Enrollment> {
        if has_duplicate_assets(&data.bundles) {
            return Err(QuotaError::Validation(
                "duplicate asset in bundles".to_string(),
            ));
        }
        let now = Utc::now();
        let started_at = data.started_at.unwrap_or(now);
        if let Some(expired_at) = data.expired_at {
            if started_at > expired_at {
                return Err(QuotaError::Validation(
                    "started_at must be <= expired_at".to_string(),
                ));
            }
        }

        let user_id = scope.user_id.or(data.user_id).ok_or_else(|| {
            QuotaError::Validation("user_id is required for operator-created enrollments".into())
        })?;
        let acquisition_type = data
            .acquisition_type
            .unwrap_or(AcquisitionType::Purchase)
            .as_str();
        let status = data.status.unwrap_or(EnrollmentStatus::Active).as_str();
        let bundles = serde_json::to_value(&data.bundles)
            .map_err(|e| QuotaError::Validation(format!("invalid bundles: {e}")))?;

        let row = sqlx::query_as::<_, EnrollmentRow>(
            r#"
            INSERT INTO quota_enrollments (
                uid, business_name, user_id, created_at, updated_at, is_deleted,
                price, invoice_id, acquisition_type, started_at, expired_at, status,
                bundles, variant, due_date, is_paid, meta_data
            ) VALUES (
                $1, $2, $3, $4, $4, FALSE,
                $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15
            )
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&scope.business_name)
        .bind(user_id)
        .bind(now)
        .bind(data.price)
        .bind(&data.invoice_id)
        .bind(acquisition_type)
        .bind(started_at)
        .bind(data.expired_at)
        .bind(status)
        .bind(bundles)
        .bind(&data.variant)
        .bind(data.due_date)
        .bind(data.is_paid)
        .bind(&data.meta_data)
        .fetch_one(&self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        row.into_enrollment()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))
    }

    async fn get(&self, scope: &Scope, uid: Uuid) -> QuotaResult<Enrollment> {
        let row = sqlx::query_as::<_, EnrollmentRow>(
            "SELECT * FROM quota_enrollments WHERE uid = $1 AND is_deleted = FALSE",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(QuotaError::Internal)?
        .ok_or(QuotaError::NotFound)?;

        let enrollment = row
            .into_enrollment()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))?;
        enforce_scope(scope, &enrollment)?;
        Ok(enrollment)
    }

    async fn list(
        &self,
        scope: &Scope,
        offset: i64,
        limit: i64,
    ) -> QuotaResult<PaginatedResponse<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(
            r#"
            SELECT * FROM quota_enrollments
            WHERE business_name = $1
              AND is_deleted = FALSE
              AND ($2::uuid IS NULL OR user_id = $2)
            ORDER BY created_at DESC
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(&scope.business_name)
        .bind(scope.user_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM quota_enrollments
            WHERE business_name = $1
              AND is_deleted = FALSE
              AND ($2::uuid IS NULL OR user_id = $2)
            "#,
        )
        .bind(&scope.business_name)
        .bind(scope.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        let items = rows
            .into_iter()
            .map(|r| r.into_enrollment())
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))?;

        Ok(PaginatedResponse {
            items,
            total,
            offset,
            limit,
        })
    }

    async fn find_active(
        &self,
        business_name: &str,
        user_id: Uuid,
        asset: &str,
        variant: Option<&str>,
        enrollment_id: Option<Uuid>,
    ) -> QuotaResult<Vec<Enrollment>> {
        let now = Utc::now();
        let rows = sqlx::query_as::<_, EnrollmentRow>(
            r#"
            SELECT * FROM quota_enrollments
            WHERE business_name = $1
              AND user_id = $2
              AND is_deleted = FALSE
              AND started_at < $3
              AND status = 'active'
              AND bundles @> jsonb_build_array(jsonb_build_object('asset', $4::text))
              AND (
                    acquisition_type = 'purchase'
                 OR (acquisition_type = 'borrowed' AND due_date > $3 AND is_paid = FALSE)
                  )
              AND (expired_at > $3 OR expired_at IS NULL)
              AND (variant IS NULL OR variant = $5)
              AND ($6::uuid IS NULL OR uid = $6)
            ORDER BY
                (variant IS NOT NULL) DESC,
                (expired_at IS NOT NULL) DESC,
                expired_at ASC,
                uid ASC
            "#,
        )
        .bind(business_name)
        .bind(user_id)
        .bind(now)
        .bind(asset)
        .bind(variant)
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        rows.into_iter()
            .map(|r| r.into_enrollment())
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))
    }
}

/// Locks the given enrollment rows for the lifetime of `tx` (§5's
/// row-lock concurrency strategy). Used by `quota::commit` to serialize
/// concurrent debits against the same enrollment before reading its
/// current leftover.
pub(crate) async fn lock_for_update(
    tx: &mut Transaction<'_, Postgres>,
    uids: &[Uuid],
) -> QuotaResult<()> {
    if uids.is_empty() {
        return Ok(());
    }
    sqlx::query("SELECT uid FROM quota_enrollments WHERE uid = ANY($1) FOR UPDATE")
        .bind(uids)
        .fetch_all(&mut **tx)
        .await
        .map_err(QuotaError::Internal)?;
    Ok(())
}
