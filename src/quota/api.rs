//! HTTP surface: axum handlers for enrollment/usage administration and
//! the usage-commit endpoint, merged into `routes::api_routes()`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::admin::EnrollmentAdmin;
use super::commit::{UsageCommit, UsageRequest};
use super::config::PAGE_MAX_LIMIT;
use super::error::{QuotaError, QuotaResult};
use super::freemium::StaticFreemiumQuotaSource;
use super::ledger::{PostgresUsageLedger, UsageLedger};
use super::model::{EnrollmentCreate, EnrollmentDetail, PaginatedResponse, Usage, UsageCreate};
use super::principal::{Principal, Role};
use super::store::PostgresEnrollmentStore;

pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/quota/enrollments",
            get(list_enrollments).post(create_enrollment),
        )
        .route(
            "/api/quota/enrollments/:uid",
            get(get_enrollment).delete(delete_enrollment),
        )
        .route("/api/quota/usages", get(list_usages).post(create_usage))
        .route(
            "/api/quota/usages/:uid",
            get(get_usage).delete(delete_usage),
        )
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

impl Pagination {
    fn resolve(&self) -> (i64, i64) {
        (self.offset.unwrap_or(0), self.limit.unwrap_or(*PAGE_MAX_LIMIT))
    }
}

fn admin(pool: PgPool) -> EnrollmentAdmin {
    EnrollmentAdmin::new(
        Arc::new(PostgresEnrollmentStore::new(pool.clone())),
        PostgresUsageLedger::new(pool),
    )
}

async fn list_enrollments(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Query(page): Query<Pagination>,
) -> QuotaResult<Json<PaginatedResponse<EnrollmentDetail>>> {
    let (offset, limit) = page.resolve();
    let result = admin(pool).list(&principal, offset, limit).await?;
    Ok(Json(result))
}

async fn get_enrollment(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Path(uid): Path<Uuid>,
) -> QuotaResult<Json<EnrollmentDetail>> {
    let result = admin(pool).get(&principal, uid).await?;
    Ok(Json(result))
}

async fn create_enrollment(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Json(payload): Json<EnrollmentCreate>,
) -> QuotaResult<(StatusCode, Json<EnrollmentDetail>)> {
    let result = admin(pool).create(&principal, payload).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn delete_enrollment(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Path(uid): Path<Uuid>,
) -> QuotaResult<StatusCode> {
    admin(pool).soft_delete(&principal, uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_usages(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Query(page): Query<Pagination>,
) -> QuotaResult<Json<PaginatedResponse<Usage>>> {
    let (offset, limit) = page.resolve();
    if offset < 0 {
        return Err(QuotaError::Validation("offset must be >= 0".into()));
    }
    if !(1..=*PAGE_MAX_LIMIT).contains(&limit) {
        return Err(QuotaError::Validation(format!(
            "limit must be between 1 and {}",
            *PAGE_MAX_LIMIT
        )));
    }
    let ledger = PostgresUsageLedger::new(pool);
    let scope = principal.scope();
    let result = ledger.list(&scope.business_name, scope.user_id, offset, limit).await?;
    Ok(Json(result))
}

async fn get_usage(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Path(uid): Path<Uuid>,
) -> QuotaResult<Json<Usage>> {
    let ledger = PostgresUsageLedger::new(pool);
    let usage = ledger.get(uid).await?;
    let scope = principal.scope();
    if usage.business_name != scope.business_name {
        return Err(QuotaError::NotFound);
    }
    if let Some(user_id) = scope.user_id {
        if usage.user_id != user_id {
            return Err(QuotaError::NotFound);
        }
    }
    Ok(Json(usage))
}

/// Usage creation is operator-only, same as enrollment creation (spec.md
/// §6: "403 if user principal"). End-users consume quota through the host
/// application, not by calling this API themselves.
async fn create_usage(
    Extension(pool): Extension<PgPool>,
    principal: Principal,
    Json(payload): Json<UsageCreate>,
) -> QuotaResult<(StatusCode, Json<Vec<Usage>>)> {
    if principal.role == Role::EndUser {
        return Err(QuotaError::Unauthorized);
    }
    let scope = super::model::Scope {
        business_name: principal.business_name.clone(),
        user_id: Some(principal.user_id),
    };
    let store = Arc::new(PostgresEnrollmentStore::new(pool.clone()));
    let commit = UsageCommit::new(pool, store);
    let source = StaticFreemiumQuotaSource;
    let outcome = commit
        .commit(UsageRequest {
            scope,
            data: payload,
            freemium_source: &source,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome.entries)))
}

async fn delete_usage(Path(_uid): Path<Uuid>) -> QuotaResult<StatusCode> {
    Err(QuotaError::NotImplemented)
}
