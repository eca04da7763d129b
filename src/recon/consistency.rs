//! Breakdown-Sum-vs-Parent Consistency Enforcement
//!
//! After the aggregator computes an `EntityDailyMetric` and its breakdown
//! children for one `(entity_type, entity_id, date)`, this module verifies:
//!
//! - summed breakdown **counts** equal the parent counts exactly, minus the
//!   users excluded from the dimension (see below);
//! - summed breakdown **currency** fields equal the parent within a fixed
//!   epsilon, accumulated over at most the number of breakdown rows.
//!
//! A violation is a data-integrity fault: the partition's output is withheld
//! from commit, never silently corrected.
//!
//! # Users Without the Dimension
//!
//! A user missing a breakdown dimension is excluded from all breakdown rows
//! for that dimension but still counted in the parent. The checker therefore
//! compares child sums against the parent minus the per-field exclusion
//! totals the aggregator measured while building the rows.
//!
//! # Platform Fields
//!
//! Platform-reported fields (spend, impressions, clicks, platform counts)
//! participate only when the platform supplied breakdown rows for the key at
//! all; a platform without per-dimension reporting is a partial source, not
//! an integrity fault.

use crate::recon::faults::ConsistencyViolation;
use crate::recon::model::{BreakdownDailyMetric, BreakdownType, EntityDailyMetric, MetricBody};

/// One hundredth of the minor currency unit, in major units.
pub const CURRENCY_EPSILON: f64 = 0.0001;

/// Per-field totals for users excluded from one breakdown dimension.
/// Measured by the aggregator while assembling rows, consumed here.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DimensionExclusions {
    pub trial_user_count: i64,
    pub purchase_user_count: i64,
    pub renewal_user_count: i64,
    pub cancellation_user_count: i64,
    pub refund_user_count: i64,
    pub trial_refund_user_count: i64,
    pub trial_revenue: f64,
    pub purchase_revenue: f64,
    pub refunded_revenue: f64,
}

/// Shared state for one verification pass.
struct Checker<'a> {
    parent: &'a EntityDailyMetric,
    breakdown_type: BreakdownType,
    currency_tolerance: f64,
    violations: Vec<ConsistencyViolation>,
}

impl Checker<'_> {
    fn check_count(&mut self, field: &'static str, parent_value: i64, excluded: i64, children_sum: i64) {
        if children_sum != parent_value - excluded {
            self.violations.push(ConsistencyViolation {
                key: self.parent.key.clone(),
                breakdown_type: self.breakdown_type,
                field: field.to_string(),
                parent_value: (parent_value - excluded) as f64,
                children_sum: children_sum as f64,
            });
        }
    }

    fn check_currency(&mut self, field: &'static str, parent_value: f64, excluded: f64, children_sum: f64) {
        if (children_sum - (parent_value - excluded)).abs() > self.currency_tolerance {
            self.violations.push(ConsistencyViolation {
                key: self.parent.key.clone(),
                breakdown_type: self.breakdown_type,
                field: field.to_string(),
                parent_value: parent_value - excluded,
                children_sum,
            });
        }
    }
}

/// Verify one parent row against its children for one breakdown dimension.
///
/// Returns every violation found; an empty vec means the invariant holds.
pub fn verify_breakdown_sums(
    parent: &EntityDailyMetric,
    breakdown_type: BreakdownType,
    children: &[BreakdownDailyMetric],
    exclusions: &DimensionExclusions,
) -> Vec<ConsistencyViolation> {
    let n_children = children.len().max(1) as f64;
    let mut checker = Checker {
        parent,
        breakdown_type,
        currency_tolerance: CURRENCY_EPSILON * n_children,
        violations: Vec::new(),
    };

    let sum = |f: fn(&MetricBody) -> i64| -> i64 { children.iter().map(|c| f(&c.body)).sum() };
    let sum_f = |f: fn(&MetricBody) -> f64| -> f64 { children.iter().map(|c| f(&c.body)).sum() };

    checker.check_count(
        "trial_user_count",
        parent.body.trial_user_count,
        exclusions.trial_user_count,
        sum(|b| b.trial_user_count),
    );
    checker.check_count(
        "purchase_user_count",
        parent.body.purchase_user_count,
        exclusions.purchase_user_count,
        sum(|b| b.purchase_user_count),
    );
    checker.check_count(
        "renewal_user_count",
        parent.body.renewal_user_count,
        exclusions.renewal_user_count,
        sum(|b| b.renewal_user_count),
    );
    checker.check_count(
        "cancellation_user_count",
        parent.body.cancellation_user_count,
        exclusions.cancellation_user_count,
        sum(|b| b.cancellation_user_count),
    );
    checker.check_count(
        "refund_user_count",
        parent.body.refund_user_count,
        exclusions.refund_user_count,
        sum(|b| b.refund_user_count),
    );
    checker.check_count(
        "trial_refund_user_count",
        parent.body.trial_refund_user_count,
        exclusions.trial_refund_user_count,
        sum(|b| b.trial_refund_user_count),
    );

    checker.check_currency(
        "trial_revenue",
        parent.body.trial_revenue,
        exclusions.trial_revenue,
        sum_f(|b| b.trial_revenue),
    );
    checker.check_currency(
        "purchase_revenue",
        parent.body.purchase_revenue,
        exclusions.purchase_revenue,
        sum_f(|b| b.purchase_revenue),
    );
    checker.check_currency(
        "refunded_revenue",
        parent.body.refunded_revenue,
        exclusions.refunded_revenue,
        sum_f(|b| b.refunded_revenue),
    );

    // Platform side, only when the platform reported this dimension at all.
    let platform_reported = children.iter().any(|c| {
        c.body.spend != 0.0
            || c.body.impressions != 0
            || c.body.clicks != 0
            || c.body.platform_trial_count != 0
            || c.body.platform_purchase_count != 0
    });
    if platform_reported {
        checker.check_count(
            "platform_trial_count",
            parent.body.platform_trial_count,
            0,
            sum(|b| b.platform_trial_count),
        );
        checker.check_count(
            "platform_purchase_count",
            parent.body.platform_purchase_count,
            0,
            sum(|b| b.platform_purchase_count),
        );
        checker.check_count("impressions", parent.body.impressions, 0, sum(|b| b.impressions));
        checker.check_count("clicks", parent.body.clicks, 0, sum(|b| b.clicks));
        checker.check_currency("spend", parent.body.spend, 0.0, sum_f(|b| b.spend));
    }

    checker.violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon::model::{Day, EntityDayKey, EntityType};

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn key() -> EntityDayKey {
        EntityDayKey {
            entity_type: EntityType::Campaign,
            entity_id: "c1".to_string(),
            date: day("2025-07-03"),
        }
    }

    fn parent_with_trials(trials: i64, revenue: f64) -> EntityDailyMetric {
        let mut body = MetricBody::default();
        body.trial_user_count = trials;
        body.trial_revenue = revenue;
        EntityDailyMetric { key: key(), body }
    }

    fn child(value: &str, trials: i64, revenue: f64) -> BreakdownDailyMetric {
        let mut body = MetricBody::default();
        body.trial_user_count = trials;
        body.trial_revenue = revenue;
        BreakdownDailyMetric {
            key: key(),
            breakdown_type: BreakdownType::Country,
            breakdown_value: value.to_string(),
            body,
        }
    }

    #[test]
    fn test_matching_sums_pass() {
        // Scenario D: US trials=10, CA trials=5, parent trials=15.
        let parent = parent_with_trials(15, 150.0);
        let children = vec![child("US", 10, 100.0), child("CA", 5, 50.0)];
        let violations = verify_breakdown_sums(
            &parent,
            BreakdownType::Country,
            &children,
            &DimensionExclusions::default(),
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_count_mismatch_detected() {
        let parent = parent_with_trials(16, 150.0);
        let children = vec![child("US", 10, 100.0), child("CA", 5, 50.0)];
        let violations = verify_breakdown_sums(
            &parent,
            BreakdownType::Country,
            &children,
            &DimensionExclusions::default(),
        );
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "trial_user_count");
        assert_eq!(violations[0].parent_value, 16.0);
        assert_eq!(violations[0].children_sum, 15.0);
    }

    #[test]
    fn test_currency_within_epsilon_passes() {
        let parent = parent_with_trials(15, 150.0);
        let children = vec![
            child("US", 10, 100.00004),
            child("CA", 5, 49.99999),
        ];
        let violations = verify_breakdown_sums(
            &parent,
            BreakdownType::Country,
            &children,
            &DimensionExclusions::default(),
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_currency_beyond_epsilon_fails() {
        let parent = parent_with_trials(15, 150.0);
        let children = vec![child("US", 10, 100.0), child("CA", 5, 49.0)];
        let violations = verify_breakdown_sums(
            &parent,
            BreakdownType::Country,
            &children,
            &DimensionExclusions::default(),
        );
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "trial_revenue");
    }

    #[test]
    fn test_excluded_users_reconciled() {
        // Parent counts 15 trials but 3 users have no country; children
        // legitimately sum to 12.
        let parent = parent_with_trials(15, 150.0);
        let children = vec![child("US", 8, 90.0), child("CA", 4, 30.0)];
        let exclusions = DimensionExclusions {
            trial_user_count: 3,
            trial_revenue: 30.0,
            ..Default::default()
        };
        let violations =
            verify_breakdown_sums(&parent, BreakdownType::Country, &children, &exclusions);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_platform_fields_skipped_when_unreported() {
        // Parent has spend but the platform gave no per-country rows; the
        // zero child spend must not raise a fault.
        let mut parent = parent_with_trials(10, 100.0);
        parent.body.spend = 500.0;
        parent.body.impressions = 1000;
        let children = vec![child("US", 10, 100.0)];
        let violations = verify_breakdown_sums(
            &parent,
            BreakdownType::Country,
            &children,
            &DimensionExclusions::default(),
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_platform_fields_checked_when_reported() {
        let mut parent = parent_with_trials(10, 100.0);
        parent.body.spend = 500.0;
        let mut c = child("US", 10, 100.0);
        c.body.spend = 300.0; // platform reported, but does not sum up
        let violations = verify_breakdown_sums(
            &parent,
            BreakdownType::Country,
            &[c],
            &DimensionExclusions::default(),
        );
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "spend");
    }

    #[test]
    fn test_no_children_no_exclusions_requires_zero_parent() {
        let parent = parent_with_trials(0, 0.0);
        let violations = verify_breakdown_sums(
            &parent,
            BreakdownType::Country,
            &[],
            &DimensionExclusions::default(),
        );
        assert!(violations.is_empty());
    }
}
