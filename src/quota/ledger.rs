//! Usage ledger: the append-only record that is the authoritative source
//! of an enrollment's current leftover (spec.md §3, §4.3 — "the ledger IS
//! the state").

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::bundle::is_valid_leftover;
use super::error::{QuotaError, QuotaResult};
use super::model::{Bundle, Enrollment, Usage, UsageRow};

/// Fields needed to append one ledger row; `uid`/`created_at` are assigned
/// by the ledger itself so append order and monotonic timestamps are
/// enforced in one place (spec.md §4.6).
#[derive(Clone, Debug)]
pub struct NewUsage {
    pub business_name: String,
    pub user_id: Uuid,
    pub enrollment_id: Uuid,
    pub asset: String,
    pub amount: Decimal,
    pub variant: Option<String>,
    pub leftover_bundles: Vec<Bundle>,
    pub meta_data: Option<serde_json::Value>,
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Most recent usage row for `enrollment_id`, by `created_at` desc then
    /// `uid` desc.
    async fn latest(&self, enrollment_id: Uuid) -> QuotaResult<Option<Usage>>;

    /// `latest(enrollment.uid).leftover_bundles` if present, else a copy of
    /// `enrollment.bundles` — callers must never be able to mutate the
    /// backing enrollment through the returned value.
    async fn leftover_of(&self, enrollment: &Enrollment) -> QuotaResult<Vec<Bundle>> {
        Ok(match self.latest(enrollment.uid).await? {
            Some(usage) => usage.leftover_bundles,
            None => enrollment.bundles.clone(),
        })
    }

    async fn get(&self, uid: Uuid) -> QuotaResult<Usage>;

    async fn list(
        &self,
        business_name: &str,
        user_id: Option<Uuid>,
        offset: i64,
        limit: i64,
    ) -> QuotaResult<super::model::PaginatedResponse<Usage>>;

    /// Appends a single ledger row. Rejects (spec.md §4.3): a missing
    /// `enrollment_id`, `amount <= 0`, or a `leftover_bundles` whose asset
    /// set is not a subset of the enrollment's original `bundles`.
    async fn append(&self, enrollment: &Enrollment, usage: NewUsage) -> QuotaResult<Usage>;
}

fn validate_append(enrollment: &Enrollment, usage: &NewUsage) -> QuotaResult<()> {
    if usage.amount <= Decimal::ZERO {
        return Err(QuotaError::Validation(
            "usage amount must be positive".to_string(),
        ));
    }
    if !is_valid_leftover(&enrollment.bundles, &usage.leftover_bundles) {
        return Err(QuotaError::Validation(
            "leftover_bundles contains an asset absent from the enrollment".to_string(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PostgresUsageLedger {
    pool: PgPool,
}

impl PostgresUsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reads the enrollment's current leftover within `tx`, after its row
    /// has been locked with [`super::store::lock_for_update`] — the
    /// read-under-lock half of the row-lock concurrency strategy (spec.md
    /// §5): two commits racing for the same enrollment serialize on the
    /// lock, and the loser sees the winner's appended usage row here.
    pub async fn leftover_of_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        enrollment: &Enrollment,
    ) -> QuotaResult<Vec<Bundle>> {
        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT * FROM quota_usages
            WHERE enrollment_id = $1
            ORDER BY created_at DESC, uid DESC
            LIMIT 1
            "#,
        )
        .bind(enrollment.uid)
        .fetch_optional(&mut **tx)
        .await
        .map_err(QuotaError::Internal)?;

        match row {
            Some(row) => row
                .into_usage()
                .map(|usage| usage.leftover_bundles)
                .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into()))),
            None => Ok(enrollment.bundles.clone()),
        }
    }

    /// Appends within a caller-supplied transaction, used by
    /// `quota::commit::UsageCommit` so an entire plan's rows commit or
    /// rollback atomically (spec.md §5).
    pub async fn append_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        enrollment: &Enrollment,
        usage: NewUsage,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> QuotaResult<Usage> {
        validate_append(enrollment, &usage)?;

        let leftover = serde_json::to_value(&usage.leftover_bundles)
            .map_err(|e| QuotaError::Validation(format!("invalid leftover_bundles: {e}")))?;

        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            INSERT INTO quota_usages (
                uid, business_name, user_id, created_at, enrollment_id,
                asset, amount, variant, leftover_bundles, meta_data
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&usage.business_name)
        .bind(usage.user_id)
        .bind(created_at)
        .bind(usage.enrollment_id)
        .bind(&usage.asset)
        .bind(usage.amount)
        .bind(&usage.variant)
        .bind(leftover)
        .bind(&usage.meta_data)
        .fetch_one(&mut *tx)
        .await
        .map_err(QuotaError::Internal)?;

        row.into_usage()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))
    }
}

#[async_trait]
impl UsageLedger for PostgresUsageLedger {
    async fn latest(&self, enrollment_id: Uuid) -> QuotaResult<Option<Usage>> {
        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT * FROM quota_usages
            WHERE enrollment_id = $1
            ORDER BY created_at DESC, uid DESC
            LIMIT 1
            "#,
        )
        .bind(enrollment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        row.map(|r| r.into_usage())
            .transpose()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))
    }

    async fn get(&self, uid: Uuid) -> QuotaResult<Usage> {
        let row = sqlx::query_as::<_, UsageRow>("SELECT * FROM quota_usages WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(QuotaError::Internal)?
            .ok_or(QuotaError::NotFound)?;

        row.into_usage()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))
    }

    async fn list(
        &self,
        business_name: &str,
        user_id: Option<Uuid>,
        offset: i64,
        limit: i64,
    ) -> QuotaResult<super::model::PaginatedResponse<Usage>> {
        let rows = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT * FROM quota_usages
            WHERE business_name = $1 AND ($2::uuid IS NULL OR user_id = $2)
            ORDER BY created_at DESC
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(business_name)
        .bind(user_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM quota_usages WHERE business_name = $1 AND ($2::uuid IS NULL OR user_id = $2)",
        )
        .bind(business_name)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(QuotaError::Internal)?;

        let items = rows
            .into_iter()
            .map(|r| r.into_usage())
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|e| QuotaError::Internal(sqlx::Error::Decode(e.into())))?;

        Ok(super::model::PaginatedResponse {
            items,
            total,
            offset,
            limit,
        })
    }

    async fn append(&self, enrollment: &Enrollment, usage: NewUsage) -> QuotaResult<Usage> {
        validate_append(enrollment, &usage)?;
        let mut tx = self.pool.begin().await.map_err(QuotaError::Internal)?;
        let row = Self::append_in_tx(&mut tx, enrollment, usage, chrono::Utc::now()).await?;
        tx.commit().await.map_err(QuotaError::Internal)?;
        Ok(row)
    }
}
