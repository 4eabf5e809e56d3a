//! Enrollment selection and splitting: given a requested amount of an
//! asset and a set of candidate enrollments already in priority order
//! (spec.md §4.2), decide how much to take from each.
//!
//! This is the pure core the rest of the service wraps: it takes already
//! loaded data in, returns a plan out, and touches neither a database nor
//! the clock. The async orchestration that gathers candidates (freemium
//! provisioning, `find_active`, reading each enrollment's current leftover
//! from the ledger) lives in [`crate::quota::commit`].

use rust_decimal::Decimal;
use uuid::Uuid;

use super::bundle::deduct;
use super::model::{Bundle, Enrollment};

/// One enrollment in priority order, paired with its current leftover
/// (the ledger's latest `leftover_bundles`, or the original `bundles` if
/// the enrollment has never been debited).
#[derive(Clone, Debug)]
pub struct Candidate {
    pub enrollment: Enrollment,
    pub leftover: Vec<Bundle>,
}

/// The portion of a request satisfied from one enrollment.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanSplit {
    pub enrollment_id: Uuid,
    pub amount: Decimal,
    pub leftover_bundles: Vec<Bundle>,
}

/// The outcome of selection: zero or more splits covering up to
/// `requested`. `granted` is the sum of each split's `amount`; `shortfall`
/// is `requested - granted` (spec.md §4.5/§4.6 "atomic in aggregate" —
/// callers apply every split together or none at all).
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionPlan {
    pub requested: Decimal,
    pub granted: Decimal,
    pub splits: Vec<PlanSplit>,
}

impl SelectionPlan {
    pub fn shortfall(&self) -> Decimal {
        self.requested - self.granted
    }

    pub fn is_fully_granted(&self) -> bool {
        self.shortfall() <= Decimal::ZERO
    }
}

/// Walks `candidates` in the order given, deducting `amount` of `asset`
/// from each candidate's leftover bundles until the residual reaches zero
/// or candidates are exhausted (spec.md §4.5). A candidate contributing
/// zero (its leftover has no matching bundle) produces no split.
pub fn select(candidates: &[Candidate], asset: &str, amount: Decimal) -> SelectionPlan {
    let mut residual = amount;
    let mut splits = Vec::new();

    for candidate in candidates {
        if residual <= Decimal::ZERO {
            break;
        }
        let (used, next_leftover) = deduct(&candidate.leftover, asset, residual);
        if used <= Decimal::ZERO {
            continue;
        }
        residual -= used;
        splits.push(PlanSplit {
            enrollment_id: candidate.enrollment.uid,
            amount: used,
            leftover_bundles: next_leftover,
        });
    }

    SelectionPlan {
        requested: amount,
        granted: amount - residual.max(Decimal::ZERO),
        splits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::quota::model::{AcquisitionType, EnrollmentStatus};

    fn enrollment(bundles: Vec<Bundle>, expired_at: Option<chrono::DateTime<Utc>>) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            uid: Uuid::new_v4(),
            business_name: "acme".to_string(),
            user_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            price: dec!(0),
            invoice_id: None,
            acquisition_type: AcquisitionType::Purchase,
            started_at: now,
            expired_at,
            status: EnrollmentStatus::Active,
            bundles: bundles.clone(),
            variant: None,
            due_date: None,
            is_paid: true,
            meta_data: None,
        }
    }

    fn candidate(quota: Decimal, expired_at: Option<chrono::DateTime<Utc>>) -> Candidate {
        let bundles = vec![Bundle::new("image", quota)];
        Candidate {
            enrollment: enrollment(bundles.clone(), expired_at),
            leftover: bundles,
        }
    }

    #[test]
    fn single_candidate_fully_covers_request() {
        let candidates = vec![candidate(dec!(10), None)];
        let plan = select(&candidates, "image", dec!(4));
        assert!(plan.is_fully_granted());
        assert_eq!(plan.splits.len(), 1);
        assert_eq!(plan.splits[0].amount, dec!(4));
        assert_eq!(plan.splits[0].leftover_bundles[0].quota, dec!(6));
    }

    #[test]
    fn request_spans_two_enrollments_in_order() {
        let first = candidate(dec!(3), None);
        let second = candidate(dec!(10), None);
        let first_id = first.enrollment.uid;
        let second_id = second.enrollment.uid;
        let plan = select(&[first, second], "image", dec!(7));

        assert!(plan.is_fully_granted());
        assert_eq!(plan.splits.len(), 2);
        assert_eq!(plan.splits[0].enrollment_id, first_id);
        assert_eq!(plan.splits[0].amount, dec!(3));
        assert_eq!(plan.splits[1].enrollment_id, second_id);
        assert_eq!(plan.splits[1].amount, dec!(4));
        assert_eq!(plan.splits[1].leftover_bundles[0].quota, dec!(6));
    }

    #[test]
    fn insufficient_total_quota_yields_partial_plan_with_shortfall() {
        let candidates = vec![candidate(dec!(2), None), candidate(dec!(3), None)];
        let plan = select(&candidates, "image", dec!(10));

        assert!(!plan.is_fully_granted());
        assert_eq!(plan.granted, dec!(5));
        assert_eq!(plan.shortfall(), dec!(5));
        assert_eq!(plan.splits.len(), 2);
    }

    #[test]
    fn no_candidates_yields_empty_plan() {
        let plan = select(&[], "image", dec!(1));
        assert_eq!(plan.granted, Decimal::ZERO);
        assert_eq!(plan.shortfall(), dec!(1));
        assert!(plan.splits.is_empty());
    }

    #[test]
    fn candidate_without_matching_asset_is_skipped_without_a_split() {
        let empty = Candidate {
            enrollment: enrollment(vec![Bundle::new("text", dec!(5))], None),
            leftover: vec![Bundle::new("text", dec!(5))],
        };
        let has_it = candidate(dec!(4), None);
        let has_it_id = has_it.enrollment.uid;
        let plan = select(&[empty, has_it], "image", dec!(4));

        assert!(plan.is_fully_granted());
        assert_eq!(plan.splits.len(), 1);
        assert_eq!(plan.splits[0].enrollment_id, has_it_id);
    }

    #[test]
    fn soonest_expiry_first_ordering_is_respected_as_given() {
        let soon = candidate(dec!(2), Some(Utc::now() + chrono::Duration::days(1)));
        let later = candidate(dec!(2), Some(Utc::now() + chrono::Duration::days(30)));
        let soon_id = soon.enrollment.uid;
        let plan = select(&[soon, later], "image", dec!(2));

        assert_eq!(plan.splits.len(), 1);
        assert_eq!(plan.splits[0].enrollment_id, soon_id);
    }
}
