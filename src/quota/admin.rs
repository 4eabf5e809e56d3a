//! Enrollment administration: role-gated create, scoped list/get, and the
//! always-rejected delete (spec.md §4.7).

use std::sync::Arc;
use uuid::Uuid;

use super::config::PAGE_MAX_LIMIT;
use super::error::{QuotaError, QuotaResult};
use super::ledger::{PostgresUsageLedger, UsageLedger};
use super::model::{EnrollmentCreate, EnrollmentDetail, PaginatedResponse, Scope};
use super::principal::{Principal, Role};
use super::store::EnrollmentStore;

#[derive(Clone)]
pub struct EnrollmentAdmin {
    store: Arc<dyn EnrollmentStore>,
    ledger: PostgresUsageLedger,
}

impl EnrollmentAdmin {
    pub fn new(store: Arc<dyn EnrollmentStore>, ledger: PostgresUsageLedger) -> Self {
        Self { store, ledger }
    }

    /// Only operators may create enrollments; end-user callers hold
    /// enrollments, they don't grant them (spec.md §4.7).
    pub async fn create(
        &self,
        principal: &Principal,
        mut data: EnrollmentCreate,
    ) -> QuotaResult<EnrollmentDetail> {
        if principal.role == Role::EndUser {
            return Err(QuotaError::Unauthorized);
        }
        data.user_id = data.user_id.or(Some(principal.user_id));
        let scope = Scope {
            business_name: principal.business_name.clone(),
            user_id: None,
        };
        let enrollment = self.store.create(&scope, data).await?;
        let leftover_bundles = self.ledger.leftover_of(&enrollment).await?;
        Ok(EnrollmentDetail {
            enrollment,
            leftover_bundles,
        })
    }

    pub async fn get(&self, principal: &Principal, uid: Uuid) -> QuotaResult<EnrollmentDetail> {
        let enrollment = self.store.get(&principal.scope(), uid).await?;
        let leftover_bundles = self.ledger.leftover_of(&enrollment).await?;
        Ok(EnrollmentDetail {
            enrollment,
            leftover_bundles,
        })
    }

    pub async fn list(
        &self,
        principal: &Principal,
        offset: i64,
        limit: i64,
    ) -> QuotaResult<PaginatedResponse<EnrollmentDetail>> {
        if offset < 0 {
            return Err(QuotaError::Validation("offset must be >= 0".into()));
        }
        if limit < 1 || limit > *PAGE_MAX_LIMIT {
            return Err(QuotaError::Validation(format!(
                "limit must be between 1 and {}",
                *PAGE_MAX_LIMIT
            )));
        }

        let page = self.store.list(&principal.scope(), offset, limit).await?;
        let mut items = Vec::with_capacity(page.items.len());
        for enrollment in page.items {
            let leftover_bundles = self.ledger.leftover_of(&enrollment).await?;
            items.push(EnrollmentDetail {
                enrollment,
                leftover_bundles,
            });
        }

        Ok(PaginatedResponse {
            items,
            total: page.total,
            offset: page.offset,
            limit: page.limit,
        })
    }

    pub async fn soft_delete(&self, principal: &Principal, uid: Uuid) -> QuotaResult<()> {
        self.store.soft_delete(&principal.scope(), uid).await
    }
}
