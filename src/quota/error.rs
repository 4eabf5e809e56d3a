//! Quota-domain error type, translated to HTTP at the boundary: a single
//! enum, a single `IntoResponse` impl, and nothing upstream of it catches
//! errors broadly (spec.md §7).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("item not found")]
    NotFound,
    #[error("insufficient quota: requested {requested}, granted {granted}, shortfall {shortfall}")]
    InsufficientQuota {
        requested: Decimal,
        granted: Decimal,
        shortfall: Decimal,
    },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("internal error: {0}")]
    Internal(#[from] sqlx::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    granted: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shortfall: Option<Decimal>,
}

impl QuotaError {
    fn kind(&self) -> &'static str {
        match self {
            QuotaError::Validation(_) => "validation_error",
            QuotaError::Unauthorized => "unauthorized",
            QuotaError::NotFound => "item_not_found",
            QuotaError::InsufficientQuota { .. } => "insufficient_quota",
            QuotaError::Conflict(_) => "conflict",
            QuotaError::NotImplemented => "not_implemented",
            QuotaError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            QuotaError::Validation(_) => StatusCode::BAD_REQUEST,
            QuotaError::Unauthorized => StatusCode::FORBIDDEN,
            QuotaError::NotFound => StatusCode::NOT_FOUND,
            QuotaError::InsufficientQuota { .. } => StatusCode::BAD_REQUEST,
            QuotaError::Conflict(_) => StatusCode::CONFLICT,
            QuotaError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            QuotaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for QuotaError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(error = ?self, "quota request failed");

        let (requested, granted, shortfall) = match &self {
            QuotaError::InsufficientQuota {
                requested,
                granted,
                shortfall,
            } => (Some(*requested), Some(*granted), Some(*shortfall)),
            _ => (None, None, None),
        };

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            status_code: status.as_u16(),
            requested,
            granted,
            shortfall,
        };
        (status, Json(body)).into_response()
    }
}

pub type QuotaResult<T> = Result<T, QuotaError>;
