//! Core data model: `Enrollment`, `Usage`, and their supporting enums.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::bundle::Bundle;
use super::money::{deserialize_decimal, deserialize_decimal_opt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionType {
    Purchase,
    Borrowed,
    Freemium,
    Trial,
    Credit,
    Gifted,
    Deferred,
    Promo,
    Subscription,
    OnDemand,
}

impl AcquisitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionType::Purchase => "purchase",
            AcquisitionType::Borrowed => "borrowed",
            AcquisitionType::Freemium => "freemium",
            AcquisitionType::Trial => "trial",
            AcquisitionType::Credit => "credit",
            AcquisitionType::Gifted => "gifted",
            AcquisitionType::Deferred => "deferred",
            AcquisitionType::Promo => "promo",
            AcquisitionType::Subscription => "subscription",
            AcquisitionType::OnDemand => "on_demand",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "purchase" => AcquisitionType::Purchase,
            "borrowed" => AcquisitionType::Borrowed,
            "freemium" => AcquisitionType::Freemium,
            "trial" => AcquisitionType::Trial,
            "credit" => AcquisitionType::Credit,
            "gifted" => AcquisitionType::Gifted,
            "deferred" => AcquisitionType::Deferred,
            "promo" => AcquisitionType::Promo,
            "subscription" => AcquisitionType::Subscription,
            "on_demand" => AcquisitionType::OnDemand,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Expired,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Expired => "expired",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "active" => EnrollmentStatus::Active,
            "expired" => EnrollmentStatus::Expired,
            _ => return None,
        })
    }
}

/// A user's holding of one or more bundles from a tenant.
///
/// `bundles` is the original grant and is never mutated after creation —
/// the current leftover is always derived from the usage ledger
/// (see [`crate::quota::ledger::UsageLedger::leftover_of`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Enrollment {
    pub uid: Uuid,
    pub business_name: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,

    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    pub invoice_id: Option<String>,
    pub acquisition_type: AcquisitionType,

    pub started_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
    pub status: EnrollmentStatus,

    pub bundles: Vec<Bundle>,
    pub variant: Option<String>,

    pub due_date: Option<DateTime<Utc>>,
    pub is_paid: bool,

    pub meta_data: Option<serde_json::Value>,
}

/// Row shape returned by the `quota_enrollments` Postgres table.
#[derive(Clone, Debug, FromRow)]
pub(crate) struct EnrollmentRow {
    pub uid: Uuid,
    pub business_name: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub price: Decimal,
    pub invoice_id: Option<String>,
    pub acquisition_type: String,
    pub started_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
    pub status: String,
    pub bundles: serde_json::Value,
    pub variant: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub is_paid: bool,
    pub meta_data: Option<serde_json::Value>,
}

impl EnrollmentRow {
    pub(crate) fn into_enrollment(self) -> anyhow::Result<Enrollment> {
        Ok(Enrollment {
            uid: self.uid,
            business_name: self.business_name,
            user_id: self.user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            is_deleted: self.is_deleted,
            price: self.price,
            invoice_id: self.invoice_id,
            acquisition_type: AcquisitionType::from_str(&self.acquisition_type)
                .ok_or_else(|| anyhow::anyhow!("unknown acquisition_type: {}", self.acquisition_type))?,
            started_at: self.started_at,
            expired_at: self.expired_at,
            status: EnrollmentStatus::from_str(&self.status)
                .ok_or_else(|| anyhow::anyhow!("unknown status: {}", self.status))?,
            bundles: serde_json::from_value(self.bundles)?,
            variant: self.variant,
            due_date: self.due_date,
            is_paid: self.is_paid,
            meta_data: self.meta_data,
        })
    }
}

/// An immutable usage ledger entry representing one debit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Usage {
    pub uid: Uuid,
    pub business_name: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub enrollment_id: Uuid,
    pub asset: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub amount: Decimal,
    pub variant: Option<String>,
    pub leftover_bundles: Vec<Bundle>,
    pub meta_data: Option<serde_json::Value>,
}

/// Row shape returned by the `quota_usages` Postgres table. `leftover_bundles`
/// is stored as `jsonb`; `serde_json::Value` round-trips through sqlx's
/// Postgres driver without the `json` decimal/Json<T> wrapper, matching how
/// `billing::models` stores its own `Value` columns.
#[derive(Clone, Debug, FromRow)]
pub(crate) struct UsageRow {
    pub uid: Uuid,
    pub business_name: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub enrollment_id: Uuid,
    pub asset: String,
    pub amount: Decimal,
    pub variant: Option<String>,
    pub leftover_bundles: serde_json::Value,
    pub meta_data: Option<serde_json::Value>,
}

impl UsageRow {
    pub(crate) fn into_usage(self) -> anyhow::Result<Usage> {
        Ok(Usage {
            uid: self.uid,
            business_name: self.business_name,
            user_id: self.user_id,
            created_at: self.created_at,
            enrollment_id: self.enrollment_id,
            asset: self.asset,
            amount: self.amount,
            variant: self.variant,
            leftover_bundles: serde_json::from_value(self.leftover_bundles)?,
            meta_data: self.meta_data,
        })
    }
}

/// Caller-supplied fields for creating an enrollment. `business_name` and
/// `user_id` are always overridden from the authenticated principal
/// (spec.md §4.7) — any client-supplied values here are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct EnrollmentCreate {
    pub user_id: Option<Uuid>,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub acquisition_type: Option<AcquisitionType>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<EnrollmentStatus>,
    pub bundles: Vec<Bundle>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub meta_data: Option<serde_json::Value>,
}

/// `EnrollmentDetail` response envelope: the enrollment plus its derived
/// leftover.
#[derive(Clone, Debug, Serialize)]
pub struct EnrollmentDetail {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub leftover_bundles: Vec<Bundle>,
}

/// Request body for `POST /usages`.
#[derive(Clone, Debug, Deserialize)]
pub struct UsageCreate {
    #[serde(default)]
    pub enrollment_id: Option<Uuid>,
    pub asset: String,
    #[serde(default = "default_usage_amount", deserialize_with = "deserialize_decimal_opt_with_default")]
    pub amount: Decimal,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub meta_data: Option<serde_json::Value>,
}

fn default_usage_amount() -> Decimal {
    Decimal::ONE
}

fn deserialize_decimal_opt_with_default<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match deserialize_decimal_opt(deserializer)? {
        Some(value) => Ok(value),
        None => Ok(default_usage_amount()),
    }
}

/// Paginated list envelope, generic over the item type.
#[derive(Clone, Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

/// Derives a `Scope` from the calling principal: reads within a business
/// are restricted to that business, and further to a single user for
/// end-user callers (spec.md §4.2).
#[derive(Clone, Debug)]
pub struct Scope {
    pub business_name: String,
    pub user_id: Option<Uuid>,
}
