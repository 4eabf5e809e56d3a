//! Usage commit orchestration: gathers candidate enrollments, locks them,
//! runs the selector against their locked-fresh leftover, and applies the
//! resulting plan to the ledger — all inside one transaction.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::error::{QuotaError, QuotaResult};
use super::freemium::{FreemiumProvisioner, FreemiumQuotaSource};
use super::ledger::{NewUsage, PostgresUsageLedger, UsageLedger};
use super::model::{Enrollment, Scope, Usage, UsageCreate};
use super::selector::{select, Candidate};
use super::store::{lock_for_update, EnrollmentStore};

/// Debits requested by one `POST /usages` call, ready to hand to
/// [`UsageCommit::commit`].
pub struct UsageRequest<'a> {
    pub scope: Scope,
    pub data: UsageCreate,
    pub freemium_source: &'a dyn FreemiumQuotaSource,
}

/// The applied debit: the plan that was granted plus the ledger rows it
/// produced, oldest first.
pub struct CommitOutcome {
    pub granted: Decimal,
    pub entries: Vec<Usage>,
}

#[derive(Clone)]
pub struct UsageCommit {
    pool: PgPool,
    store: Arc<dyn EnrollmentStore>,
}

/// Retried on deadlocks/serialization failures the row-lock strategy can
/// still surface when two commits lock overlapping enrollments in
/// different orders (spec.md §5, §7's bounded conflict retry).
const MAX_COMMIT_ATTEMPTS: u32 = 3;

fn is_retryable(error: &QuotaError) -> bool {
    matches!(
        error,
        QuotaError::Internal(sqlx::Error::Database(e))
            if matches!(e.code().as_deref(), Some("40001") | Some("40P01"))
    )
}

impl UsageCommit {
    pub fn new(pool: PgPool, store: Arc<dyn EnrollmentStore>) -> Self {
        Self { pool, store }
    }

    pub async fn commit(&self, request: UsageRequest<'_>) -> QuotaResult<CommitOutcome> {
        let UsageRequest {
            scope,
            data,
            freemium_source,
        } = request;

        let user_id = scope
            .user_id
            .ok_or_else(|| QuotaError::Validation("user_id is required to record usage".into()))?;

        if data.amount <= Decimal::ZERO {
            return Err(QuotaError::Validation(
                "usage amount must be positive".to_string(),
            ));
        }

        let ordered = self
            .ordered_candidates(&scope.business_name, user_id, &data, freemium_source)
            .await?;
        let order: Vec<Uuid> = ordered.iter().map(|e| e.uid).collect();
        let by_id: HashMap<Uuid, Enrollment> = ordered.into_iter().map(|e| (e.uid, e)).collect();

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            match self
                .try_commit(&scope, user_id, &data, &by_id, &order)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(error) if is_retryable(&error) && attempt < MAX_COMMIT_ATTEMPTS => continue,
                Err(error) if is_retryable(&error) => {
                    return Err(QuotaError::Conflict(
                        "usage commit lost a race against a concurrent debit".into(),
                    ))
                }
                Err(error) => return Err(error),
            }
        }

        unreachable!("loop always returns or errors within MAX_COMMIT_ATTEMPTS")
    }

    /// Locks the candidate enrollments, re-reads their leftover under that
    /// lock, recomputes the plan from that authoritative state, and
    /// applies it — all within one transaction (spec.md §5's row-lock
    /// strategy).
    async fn try_commit(
        &self,
        scope: &Scope,
        user_id: Uuid,
        data: &UsageCreate,
        by_id: &HashMap<Uuid, Enrollment>,
        order: &[Uuid],
    ) -> QuotaResult<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(QuotaError::Internal)?;
        lock_for_update(&mut tx, order).await?;

        let mut candidates = Vec::with_capacity(order.len());
        for uid in order {
            let enrollment = by_id.get(uid).expect("order built from by_id's keys");
            let leftover = PostgresUsageLedger::leftover_of_in_tx(&mut tx, enrollment).await?;
            candidates.push(Candidate {
                enrollment: enrollment.clone(),
                leftover,
            });
        }

        let plan = select(&candidates, &data.asset, data.amount);
        if !plan.is_fully_granted() {
            // A partial plan is an error in aggregate (spec.md §4.6 step 2):
            // either every split is written or none are.
            let _ = tx.rollback().await;
            return Err(QuotaError::InsufficientQuota {
                requested: plan.requested,
                granted: plan.granted,
                shortfall: plan.shortfall(),
            });
        }

        let now = chrono::Utc::now();
        let mut entries = Vec::with_capacity(plan.splits.len());
        for split in &plan.splits {
            let enrollment = by_id
                .get(&split.enrollment_id)
                .expect("split enrollment_id drawn from locked candidates");
            let new_usage = NewUsage {
                business_name: scope.business_name.clone(),
                user_id,
                enrollment_id: split.enrollment_id,
                asset: data.asset.clone(),
                amount: split.amount,
                variant: data.variant.clone(),
                leftover_bundles: split.leftover_bundles.clone(),
                meta_data: data.meta_data.clone(),
            };
            let usage =
                PostgresUsageLedger::append_in_tx(&mut tx, enrollment, new_usage, now).await?;
            entries.push(usage);
        }

        tx.commit().await.map_err(QuotaError::Internal)?;
        Ok(CommitOutcome {
            granted: plan.granted,
            entries,
        })
    }

    /// Determines selection order once (freemium, then `find_active`'s
    /// ordering) before the transaction opens. The authoritative leftover
    /// used for the actual split is re-read under lock in `try_commit`.
    async fn ordered_candidates(
        &self,
        business_name: &str,
        user_id: Uuid,
        data: &UsageCreate,
        freemium_source: &dyn FreemiumQuotaSource,
    ) -> QuotaResult<Vec<Enrollment>> {
        let mut enrollments = Vec::new();

        if data.enrollment_id.is_none() {
            let provisioner = FreemiumProvisioner::new(&self.pool, freemium_source);
            if let Some(freemium) = provisioner
                .get_or_create(business_name, user_id, data.variant.as_deref())
                .await?
            {
                enrollments.push(freemium);
            }
        }

        enrollments.extend(
            self.store
                .find_active(
                    business_name,
                    user_id,
                    &data.asset,
                    data.variant.as_deref(),
                    data.enrollment_id,
                )
                .await?,
        );

        Ok(enrollments)
    }
}
