//! Reconciliation Calculator
//!
//! Pure derivations over `(internal counts, platform counts, spend, revenue)`.
//! Every division is guarded: a zero denominator yields exactly `0.0`, never
//! an error, `NaN`, or infinity. Ratios are stored as fractions in `[0, inf)`
//! and never pre-multiplied by 100; presentation formatting happens outside
//! this engine.
//!
//! # Accuracy model
//!
//! `accuracy_ratio = internal / platform` measures what fraction of
//! platform-observed conversions the internal event stream also observed.
//! Values above 1 mean the internal stream over-counts relative to the
//! platform (attribution leakage); below 1, under-counting. When the internal
//! stream only sees a fraction of the true converting population, raw revenue
//! is scaled up by that fraction (`adjusted = raw / ratio`), on the premise
//! that platform-only users have a similar revenue profile to internal-counted
//! ones. A ratio of zero means the platform saw nothing to verify against and
//! revenue passes through unchanged.

use serde::{Deserialize, Serialize};

// =============================================================================
// GUARDED PRIMITIVES
// =============================================================================

/// `numerator / denominator`, or exactly `0.0` when the denominator is not
/// strictly positive.
#[inline]
pub fn guarded_div(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Internal-count ÷ platform-count for the same entity/date/metric.
#[inline]
pub fn accuracy_ratio(internal_count: i64, platform_count: i64) -> f64 {
    if platform_count > 0 {
        internal_count as f64 / platform_count as f64
    } else {
        0.0
    }
}

/// Scale raw revenue up to the platform-verified population estimate.
/// With no usable ratio the raw value passes through unchanged.
#[inline]
pub fn adjusted_revenue(raw_revenue: f64, accuracy_ratio: f64) -> f64 {
    if accuracy_ratio > 0.0 {
        raw_revenue / accuracy_ratio
    } else {
        raw_revenue
    }
}

/// Spend per conversion for a given cohort count.
#[inline]
pub fn cost_per_conversion(spend: f64, count: i64) -> f64 {
    if count > 0 {
        spend / count as f64
    } else {
        0.0
    }
}

/// Generic cohort rate, e.g. trial -> purchase.
#[inline]
pub fn conversion_rate(numerator_count: i64, denominator_count: i64) -> f64 {
    if denominator_count > 0 {
        numerator_count as f64 / denominator_count as f64
    } else {
        0.0
    }
}

// =============================================================================
// DERIVED METRIC BUNDLE
// =============================================================================

/// Raw inputs for one row's derivations.
///
/// The aggregator fills this from a `MetricBody`; keeping the input explicit
/// makes the numeric rules testable without any store or aggregator in play.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReconInputs {
    pub internal_trials: i64,
    pub internal_purchases: i64,
    pub internal_refunds: i64,
    pub internal_trial_refunds: i64,
    pub platform_trials: i64,
    pub platform_purchases: i64,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub trial_revenue: f64,
    pub purchase_revenue: f64,
}

/// Every derived metric the serving layer reads. The serving layer does no
/// further calculation beyond unit formatting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DerivedMetrics {
    /// internal_trials / platform_trials (guarded).
    pub trial_accuracy_ratio: f64,
    /// internal_purchases / platform_purchases (guarded).
    pub purchase_accuracy_ratio: f64,
    /// trial_revenue scaled by trial accuracy.
    pub adjusted_trial_revenue: f64,
    /// purchase_revenue scaled by purchase accuracy.
    pub adjusted_purchase_revenue: f64,
    /// adjusted_trial_revenue + adjusted_purchase_revenue.
    pub adjusted_revenue: f64,
    /// adjusted_revenue - spend.
    pub profit: f64,
    /// adjusted_revenue / spend (guarded).
    pub roas: f64,
    /// spend / internal trial count (guarded).
    pub cost_per_trial_internal: f64,
    /// spend / platform trial count (guarded).
    pub cost_per_trial_platform: f64,
    /// spend / internal purchase count (guarded).
    pub cost_per_purchase_internal: f64,
    /// spend / platform purchase count (guarded).
    pub cost_per_purchase_platform: f64,
    /// internal purchases / internal trials (guarded).
    pub trial_to_purchase_rate: f64,
    /// platform purchases / platform trials (guarded).
    pub platform_trial_to_purchase_rate: f64,
    /// internal refunds / internal purchases (guarded).
    pub refund_rate: f64,
    /// internal trial refunds / internal trials (guarded).
    pub trial_refund_rate: f64,
    /// clicks / impressions (guarded).
    pub click_through_rate: f64,
    /// spend / clicks (guarded).
    pub cost_per_click: f64,
    /// spend per thousand impressions (guarded).
    pub cost_per_mille: f64,
    /// raw purchase revenue / internal purchase count (guarded).
    pub revenue_per_purchaser: f64,
}

/// Compute the full derived bundle from one row's raw inputs.
pub fn derive(inputs: &ReconInputs) -> DerivedMetrics {
    let trial_accuracy = accuracy_ratio(inputs.internal_trials, inputs.platform_trials);
    let purchase_accuracy = accuracy_ratio(inputs.internal_purchases, inputs.platform_purchases);

    let adjusted_trial = adjusted_revenue(inputs.trial_revenue, trial_accuracy);
    let adjusted_purchase = adjusted_revenue(inputs.purchase_revenue, purchase_accuracy);
    let adjusted_total = adjusted_trial + adjusted_purchase;

    DerivedMetrics {
        trial_accuracy_ratio: trial_accuracy,
        purchase_accuracy_ratio: purchase_accuracy,
        adjusted_trial_revenue: adjusted_trial,
        adjusted_purchase_revenue: adjusted_purchase,
        adjusted_revenue: adjusted_total,
        profit: adjusted_total - inputs.spend,
        roas: guarded_div(adjusted_total, inputs.spend),
        cost_per_trial_internal: cost_per_conversion(inputs.spend, inputs.internal_trials),
        cost_per_trial_platform: cost_per_conversion(inputs.spend, inputs.platform_trials),
        cost_per_purchase_internal: cost_per_conversion(inputs.spend, inputs.internal_purchases),
        cost_per_purchase_platform: cost_per_conversion(inputs.spend, inputs.platform_purchases),
        trial_to_purchase_rate: conversion_rate(inputs.internal_purchases, inputs.internal_trials),
        platform_trial_to_purchase_rate: conversion_rate(
            inputs.platform_purchases,
            inputs.platform_trials,
        ),
        refund_rate: conversion_rate(inputs.internal_refunds, inputs.internal_purchases),
        trial_refund_rate: conversion_rate(inputs.internal_trial_refunds, inputs.internal_trials),
        click_through_rate: conversion_rate(inputs.clicks, inputs.impressions),
        cost_per_click: cost_per_conversion(inputs.spend, inputs.clicks),
        cost_per_mille: guarded_div(inputs.spend * 1000.0, inputs.impressions as f64),
        revenue_per_purchaser: cost_per_conversion(inputs.purchase_revenue, inputs.internal_purchases),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_ratio_basic() {
        assert_eq!(accuracy_ratio(40, 50), 0.8);
        assert_eq!(accuracy_ratio(50, 40), 1.25);
        assert_eq!(accuracy_ratio(0, 50), 0.0);
    }

    #[test]
    fn test_guarded_division_returns_zero_on_zero_denominator() {
        // Never NaN, never infinity, never a panic.
        assert_eq!(accuracy_ratio(12, 0), 0.0);
        assert_eq!(guarded_div(100.0, 0.0), 0.0);
        assert_eq!(cost_per_conversion(50.0, 0), 0.0);
        assert_eq!(conversion_rate(7, 0), 0.0);
        assert_eq!(guarded_div(1.0, -3.0), 0.0);
    }

    #[test]
    fn test_adjusted_revenue_scales_up_when_undercounting() {
        // Scenario C: internal 40 vs platform 50 -> ratio 0.8, 1000 -> 1250.
        let ratio = accuracy_ratio(40, 50);
        assert_eq!(ratio, 0.8);
        assert_eq!(adjusted_revenue(1000.0, ratio), 1250.0);
    }

    #[test]
    fn test_adjusted_revenue_passes_through_on_zero_ratio() {
        // Scenario B: internal 12 vs platform 0 -> ratio 0, revenue unchanged.
        let ratio = accuracy_ratio(12, 0);
        assert_eq!(ratio, 0.0);
        assert_eq!(adjusted_revenue(987.65, ratio), 987.65);
    }

    #[test]
    fn test_adjusted_revenue_monotonic() {
        // adjusted >= raw whenever 0 < ratio < 1; equal at ratio == 0.
        let raw = 500.0;
        for &(internal, platform) in &[(1i64, 100i64), (40, 50), (99, 100)] {
            let ratio = accuracy_ratio(internal, platform);
            assert!(ratio > 0.0 && ratio < 1.0);
            assert!(adjusted_revenue(raw, ratio) >= raw);
        }
        assert_eq!(adjusted_revenue(raw, 0.0), raw);
    }

    #[test]
    fn test_overcounting_scales_revenue_down() {
        // ratio > 1 (internal over-counts): estimate shrinks toward platform truth.
        let ratio = accuracy_ratio(60, 50);
        assert_eq!(ratio, 1.2);
        assert!((adjusted_revenue(1200.0, ratio) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_derive_full_bundle() {
        let inputs = ReconInputs {
            internal_trials: 40,
            internal_purchases: 20,
            internal_refunds: 2,
            internal_trial_refunds: 1,
            platform_trials: 50,
            platform_purchases: 25,
            spend: 400.0,
            impressions: 10_000,
            clicks: 250,
            trial_revenue: 0.0,
            purchase_revenue: 1000.0,
        };
        let d = derive(&inputs);

        assert_eq!(d.trial_accuracy_ratio, 0.8);
        assert_eq!(d.purchase_accuracy_ratio, 0.8);
        assert_eq!(d.adjusted_purchase_revenue, 1250.0);
        assert_eq!(d.adjusted_revenue, 1250.0);
        assert_eq!(d.profit, 850.0);
        assert_eq!(d.roas, 1250.0 / 400.0);
        assert_eq!(d.cost_per_trial_internal, 10.0);
        assert_eq!(d.cost_per_trial_platform, 8.0);
        assert_eq!(d.cost_per_purchase_internal, 20.0);
        assert_eq!(d.cost_per_purchase_platform, 16.0);
        assert_eq!(d.trial_to_purchase_rate, 0.5);
        assert_eq!(d.platform_trial_to_purchase_rate, 0.5);
        assert_eq!(d.refund_rate, 0.1);
        assert_eq!(d.trial_refund_rate, 1.0 / 40.0);
        assert_eq!(d.click_through_rate, 0.025);
        assert_eq!(d.cost_per_click, 1.6);
        assert_eq!(d.cost_per_mille, 40.0);
        assert_eq!(d.revenue_per_purchaser, 50.0);
    }

    #[test]
    fn test_derive_all_zero_inputs() {
        let d = derive(&ReconInputs::default());
        // Everything guarded lands on exactly zero; no NaN anywhere.
        assert_eq!(d.roas, 0.0);
        assert_eq!(d.profit, 0.0);
        assert_eq!(d.adjusted_revenue, 0.0);
        assert_eq!(d.refund_rate, 0.0);
        assert_eq!(d.cost_per_mille, 0.0);
        assert!(!d.click_through_rate.is_nan());
    }

    #[test]
    fn test_ratios_are_fractions_not_percentages() {
        let d = derive(&ReconInputs {
            internal_trials: 1,
            platform_trials: 4,
            ..Default::default()
        });
        assert_eq!(d.trial_accuracy_ratio, 0.25);
    }
}
