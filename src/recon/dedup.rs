//! Latest-Date-Wins Event Deduplication
//!
//! This module is the **single source of truth** for turning a user's raw
//! lifecycle events into per-day distinct-user cohorts. All per-day counts in
//! the engine MUST come through here so that aggregate and breakdown rows
//! agree by construction.
//!
//! # Canonical Rule
//!
//! For one user and one event type, among all qualifying events inside the
//! inclusive window `[start_date, end_date]`:
//!
//! - take the **latest** event date; the user contributes to that event
//!   type's count on that date only, and on no earlier date in the window,
//!   even though events occurred there;
//! - the rule applies independently per event type (one user can appear once
//!   in the trial series and once in the purchase series, on different days);
//! - events outside the window never participate.
//!
//! This mirrors how the external platform's own UI attributes a user to a
//! single day's cohort, and it keeps overlapping recompute windows from
//! double-counting a user whose events straddle the recompute boundary.
//!
//! # Revenue
//!
//! Revenue for a date is the sum of `revenue_amount` over the in-window
//! qualifying events of exactly the users attributed to that date - the same
//! membership, never an independent query - so counts and revenue stay
//! mutually consistent by construction.

use crate::recon::model::{DateWindow, Day, EventType, LifecycleEvent};
use std::collections::{BTreeMap, HashMap};

/// One event type's deduplicated per-day cohorts over a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyCohorts {
    /// date -> sorted distinct user ids attributed to that date.
    pub members_by_date: BTreeMap<Day, Vec<String>>,
    /// date -> summed revenue of the attributed users' in-window events.
    pub revenue_by_date: BTreeMap<Day, f64>,
}

impl DailyCohorts {
    /// Distinct-user count for a date (0 when no user was attributed there).
    pub fn count_for(&self, date: Day) -> i64 {
        self.members_by_date.get(&date).map_or(0, |m| m.len() as i64)
    }

    /// Membership list for a date, empty when none.
    pub fn members_for(&self, date: Day) -> &[String] {
        self.members_by_date
            .get(&date)
            .map_or(&[][..], |m| m.as_slice())
    }

    pub fn revenue_for(&self, date: Day) -> f64 {
        self.revenue_by_date.get(&date).copied().unwrap_or(0.0)
    }

    /// Total distinct users across the window. Equals the sum of the daily
    /// counts because each user is attributed to exactly one date.
    pub fn total_users(&self) -> i64 {
        self.members_by_date.values().map(|m| m.len() as i64).sum()
    }
}

/// Per-user dedup state: latest qualifying date and accumulated revenue.
#[derive(Debug, Clone, Copy)]
struct UserAccumulator {
    latest_date: Day,
    revenue: f64,
}

/// Deduplicate `events` for one event type over `window`.
///
/// `qualifies` filters which event types feed this cohort (usually a single
/// type, but purchase cohorts merge trial-conversions with direct purchases).
/// Events failing the predicate or falling outside the window are ignored.
pub fn dedup_cohorts<F>(events: &[LifecycleEvent], window: DateWindow, qualifies: F) -> DailyCohorts
where
    F: Fn(EventType) -> bool,
{
    // Pass 1: per user, find the latest in-window qualifying date and sum
    // the revenue of every in-window qualifying event.
    let mut per_user: HashMap<&str, UserAccumulator> = HashMap::new();
    for event in events {
        if !qualifies(event.event_type) {
            continue;
        }
        let day = event.day();
        if !window.contains(day) {
            continue;
        }
        per_user
            .entry(event.user_id.as_str())
            .and_modify(|acc| {
                if day > acc.latest_date {
                    acc.latest_date = day;
                }
                acc.revenue += event.revenue_amount;
            })
            .or_insert(UserAccumulator {
                latest_date: day,
                revenue: event.revenue_amount,
            });
    }

    // Pass 2: group users by their attributed date.
    let mut cohorts = DailyCohorts::default();
    for (user_id, acc) in per_user {
        cohorts
            .members_by_date
            .entry(acc.latest_date)
            .or_default()
            .push(user_id.to_string());
        *cohorts.revenue_by_date.entry(acc.latest_date).or_default() += acc.revenue;
    }

    // Sorted membership keeps serialized output byte-stable across runs.
    for members in cohorts.members_by_date.values_mut() {
        members.sort_unstable();
    }

    cohorts
}

/// Convenience: dedup for exactly one event type.
pub fn dedup_single_type(
    events: &[LifecycleEvent],
    window: DateWindow,
    event_type: EventType,
) -> DailyCohorts {
    dedup_cohorts(events, window, |t| t == event_type)
}

/// Convenience: the purchase cohort (trial conversions + direct purchases).
pub fn dedup_purchases(events: &[LifecycleEvent], window: DateWindow) -> DailyCohorts {
    dedup_cohorts(events, window, |t| t.is_purchase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn event(user: &str, ty: EventType, date: &str, revenue: f64) -> LifecycleEvent {
        let d: NaiveDate = date.parse().unwrap();
        LifecycleEvent {
            user_id: user.to_string(),
            event_type: ty,
            event_time: Utc
                .from_utc_datetime(&d.and_hms_opt(12, 0, 0).unwrap()),
            revenue_amount: revenue,
            currency: "USD".to_string(),
        }
    }

    fn window(start: &str, end: &str) -> DateWindow {
        DateWindow::new(day(start), day(end)).unwrap()
    }

    #[test]
    fn test_user_attributed_to_latest_date_only() {
        // Scenario A: trials on 07-01 and 07-03, window [07-01, 07-05].
        let events = vec![
            event("u1", EventType::TrialStarted, "2025-07-01", 0.0),
            event("u1", EventType::TrialStarted, "2025-07-03", 0.0),
        ];
        let cohorts =
            dedup_single_type(&events, window("2025-07-01", "2025-07-05"), EventType::TrialStarted);

        assert_eq!(cohorts.count_for(day("2025-07-01")), 0);
        assert_eq!(cohorts.count_for(day("2025-07-03")), 1);
        assert_eq!(cohorts.members_for(day("2025-07-03")), &["u1".to_string()]);
    }

    #[test]
    fn test_sum_of_daily_counts_bounded_by_distinct_users() {
        let events = vec![
            event("u1", EventType::TrialStarted, "2025-07-01", 0.0),
            event("u1", EventType::TrialStarted, "2025-07-02", 0.0),
            event("u2", EventType::TrialStarted, "2025-07-02", 0.0),
            event("u3", EventType::TrialStarted, "2025-07-04", 0.0),
        ];
        let cohorts =
            dedup_single_type(&events, window("2025-07-01", "2025-07-05"), EventType::TrialStarted);

        // Three distinct users, each attributed exactly once.
        assert_eq!(cohorts.total_users(), 3);
        assert_eq!(cohorts.count_for(day("2025-07-01")), 0);
        assert_eq!(cohorts.count_for(day("2025-07-02")), 2);
        assert_eq!(cohorts.count_for(day("2025-07-04")), 1);
    }

    #[test]
    fn test_events_outside_window_ignored() {
        let events = vec![
            event("u1", EventType::TrialStarted, "2025-06-30", 0.0),
            event("u1", EventType::TrialStarted, "2025-07-02", 0.0),
            event("u1", EventType::TrialStarted, "2025-07-09", 0.0),
        ];
        let cohorts =
            dedup_single_type(&events, window("2025-07-01", "2025-07-05"), EventType::TrialStarted);

        // The 07-09 event is out of window; latest IN-WINDOW date wins.
        assert_eq!(cohorts.count_for(day("2025-07-02")), 1);
        assert_eq!(cohorts.total_users(), 1);
    }

    #[test]
    fn test_event_types_deduplicated_independently() {
        let events = vec![
            event("u1", EventType::TrialStarted, "2025-07-01", 0.0),
            event("u1", EventType::InitialPurchase, "2025-07-03", 9.99),
        ];
        let w = window("2025-07-01", "2025-07-05");

        let trials = dedup_single_type(&events, w, EventType::TrialStarted);
        let purchases = dedup_purchases(&events, w);

        // Same user appears once per series, on different dates.
        assert_eq!(trials.count_for(day("2025-07-01")), 1);
        assert_eq!(purchases.count_for(day("2025-07-03")), 1);
        assert_eq!(purchases.revenue_for(day("2025-07-03")), 9.99);
    }

    #[test]
    fn test_revenue_follows_membership() {
        // u1 purchases on two days; all in-window revenue rides on the
        // latest date together with the user.
        let events = vec![
            event("u1", EventType::InitialPurchase, "2025-07-01", 10.0),
            event("u1", EventType::Renewal, "2025-07-02", 99.0), // not a purchase event
            event("u1", EventType::InitialPurchase, "2025-07-04", 15.0),
            event("u2", EventType::TrialConverted, "2025-07-02", 20.0),
        ];
        let cohorts = dedup_purchases(&events, window("2025-07-01", "2025-07-05"));

        assert_eq!(cohorts.revenue_for(day("2025-07-01")), 0.0);
        assert_eq!(cohorts.revenue_for(day("2025-07-04")), 25.0);
        assert_eq!(cohorts.revenue_for(day("2025-07-02")), 20.0);
        assert_eq!(cohorts.count_for(day("2025-07-04")), 1);
    }

    #[test]
    fn test_same_day_duplicates_count_once() {
        let events = vec![
            event("u1", EventType::TrialStarted, "2025-07-02", 0.0),
            event("u1", EventType::TrialStarted, "2025-07-02", 0.0),
        ];
        let cohorts =
            dedup_single_type(&events, window("2025-07-01", "2025-07-05"), EventType::TrialStarted);
        assert_eq!(cohorts.count_for(day("2025-07-02")), 1);
    }

    #[test]
    fn test_membership_sorted_for_determinism() {
        let events = vec![
            event("zz", EventType::TrialStarted, "2025-07-02", 0.0),
            event("aa", EventType::TrialStarted, "2025-07-02", 0.0),
            event("mm", EventType::TrialStarted, "2025-07-02", 0.0),
        ];
        let cohorts =
            dedup_single_type(&events, window("2025-07-01", "2025-07-05"), EventType::TrialStarted);
        assert_eq!(
            cohorts.members_for(day("2025-07-02")),
            &["aa".to_string(), "mm".to_string(), "zz".to_string()]
        );
    }

    #[test]
    fn test_empty_input() {
        let cohorts = dedup_single_type(&[], window("2025-07-01", "2025-07-05"), EventType::TrialStarted);
        assert_eq!(cohorts.total_users(), 0);
        assert!(cohorts.members_by_date.is_empty());
    }
}
