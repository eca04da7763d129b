//! Hierarchy Resolution
//!
//! Derives the ad -> ad-set -> campaign parent chain from co-occurrence
//! observations in the external metric stream. For each `ad_id` the parent
//! pair observed on the most distinct days wins;
//! `confidence = winning pair's days / total observed days for the ad`.
//!
//! # Majority Over Recency
//!
//! An ad observed under two different ad-sets across its lifetime (entities
//! can be reassigned) gets the **majority** parent, not the most recent one.
//! Historical daily rows for earlier dates must not retroactively change
//! parent, so stability of historical rollups wins over chasing the latest
//! reassignment.
//!
//! # Ties
//!
//! If two parents tie exactly, resolution is undefined: the edge is emitted
//! with `ambiguous = true` and `confidence` capped at 0.5, and the caller
//! records an `AmbiguousHierarchy` fault. Aggregation itself never depends
//! on parent resolution, so an ambiguous edge blocks nothing.
//!
//! Non-winning candidates are retained for audit, never used for rollups.

use crate::recon::model::{Day, HierarchyCandidate, HierarchyEdge, HierarchyObservation};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Full output of one resolver run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyResolution {
    /// One active edge per ad_id, sorted by ad_id.
    pub edges: Vec<HierarchyEdge>,
    /// Every observed candidate pairing (winners included), sorted, for audit.
    pub candidates: Vec<HierarchyCandidate>,
}

impl HierarchyResolution {
    /// Ads whose election tied (ambiguous edges).
    pub fn ambiguous_ad_ids(&self) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.ambiguous)
            .map(|e| e.ad_id.as_str())
            .collect()
    }
}

/// Resolve one `HierarchyEdge` per ad_id from the raw observations.
///
/// Duplicate observations of the same `(ad, parent pair, date)` count once;
/// the vote unit is the distinct day, not the raw row.
pub fn resolve(observations: &[HierarchyObservation]) -> HierarchyResolution {
    // ad_id -> (adset_id, campaign_id) -> distinct observation days.
    let mut days_by_pair: HashMap<&str, HashMap<(&str, &str), BTreeSet<Day>>> = HashMap::new();
    // ad_id -> all distinct observation days (the confidence denominator).
    let mut days_by_ad: HashMap<&str, BTreeSet<Day>> = HashMap::new();

    for obs in observations {
        days_by_pair
            .entry(obs.ad_id.as_str())
            .or_default()
            .entry((obs.adset_id.as_str(), obs.campaign_id.as_str()))
            .or_default()
            .insert(obs.date);
        days_by_ad
            .entry(obs.ad_id.as_str())
            .or_default()
            .insert(obs.date);
    }

    let mut edges = Vec::with_capacity(days_by_pair.len());
    let mut candidates = Vec::new();

    for (ad_id, pairs) in &days_by_pair {
        let total_days = days_by_ad[ad_id].len() as u64;

        // Deterministic winner: most days, then lexicographic pair.
        let mut ranked: Vec<(&(&str, &str), u64)> =
            pairs.iter().map(|(pair, days)| (pair, days.len() as u64)).collect();
        ranked.sort_by(|(pair_a, days_a), (pair_b, days_b)| {
            days_b.cmp(days_a).then(pair_a.cmp(pair_b))
        });

        for (pair, observed_days) in &ranked {
            candidates.push(HierarchyCandidate {
                ad_id: ad_id.to_string(),
                adset_id: pair.0.to_string(),
                campaign_id: pair.1.to_string(),
                observed_days: *observed_days,
            });
        }

        let (winner_pair, winner_days) = ranked[0];
        let ambiguous = ranked.len() > 1 && ranked[1].1 == winner_days;
        // Tied parents can share observation dates (one ad reported under
        // both on the same day), which would score a full ratio; an
        // ambiguous edge is never allowed above 0.5.
        let raw_confidence = winner_days as f64 / total_days as f64;
        let confidence = if ambiguous {
            raw_confidence.min(0.5)
        } else {
            raw_confidence
        };

        let winner_dates = &pairs[winner_pair];
        edges.push(HierarchyEdge {
            ad_id: ad_id.to_string(),
            adset_id: winner_pair.0.to_string(),
            campaign_id: winner_pair.1.to_string(),
            confidence,
            ambiguous,
            first_seen: *winner_dates.iter().next().expect("non-empty day set"),
            last_seen: *winner_dates.iter().next_back().expect("non-empty day set"),
        });
    }

    edges.sort_by(|a, b| a.ad_id.cmp(&b.ad_id));
    candidates.sort_by(|a, b| {
        a.ad_id
            .cmp(&b.ad_id)
            .then(a.adset_id.cmp(&b.adset_id))
            .then(a.campaign_id.cmp(&b.campaign_id))
    });

    debug!(
        ads = edges.len(),
        ambiguous = edges.iter().filter(|e| e.ambiguous).count(),
        "hierarchy resolution complete"
    );

    HierarchyResolution { edges, candidates }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn obs(ad: &str, adset: &str, campaign: &str, date: &str) -> HierarchyObservation {
        HierarchyObservation {
            ad_id: ad.to_string(),
            adset_id: adset.to_string(),
            campaign_id: campaign.to_string(),
            date: day(date),
        }
    }

    #[test]
    fn test_single_parent_full_confidence() {
        let resolution = resolve(&[
            obs("ad1", "as1", "c1", "2025-06-01"),
            obs("ad1", "as1", "c1", "2025-06-02"),
            obs("ad1", "as1", "c1", "2025-06-03"),
        ]);
        assert_eq!(resolution.edges.len(), 1);
        let edge = &resolution.edges[0];
        assert_eq!(edge.adset_id, "as1");
        assert_eq!(edge.campaign_id, "c1");
        assert_eq!(edge.confidence, 1.0);
        assert!(!edge.ambiguous);
        assert_eq!(edge.first_seen, day("2025-06-01"));
        assert_eq!(edge.last_seen, day("2025-06-03"));
    }

    #[test]
    fn test_majority_parent_wins_over_most_recent() {
        // Ad reassigned late in life: three days under as1, one (latest)
        // under as2. Majority keeps as1.
        let resolution = resolve(&[
            obs("ad1", "as1", "c1", "2025-06-01"),
            obs("ad1", "as1", "c1", "2025-06-02"),
            obs("ad1", "as1", "c1", "2025-06-03"),
            obs("ad1", "as2", "c1", "2025-06-09"),
        ]);
        let edge = &resolution.edges[0];
        assert_eq!(edge.adset_id, "as1");
        assert_eq!(edge.confidence, 0.75);
        assert!(!edge.ambiguous);
    }

    #[test]
    fn test_exact_tie_flagged_ambiguous() {
        let resolution = resolve(&[
            obs("ad1", "as1", "c1", "2025-06-01"),
            obs("ad1", "as1", "c1", "2025-06-02"),
            obs("ad1", "as2", "c1", "2025-06-03"),
            obs("ad1", "as2", "c1", "2025-06-04"),
        ]);
        let edge = &resolution.edges[0];
        assert!(edge.ambiguous);
        assert!(edge.confidence <= 0.5);
        assert_eq!(resolution.ambiguous_ad_ids(), vec!["ad1"]);
    }

    #[test]
    fn test_same_day_dual_parent_tie_capped_at_half_confidence() {
        // Both parents reported on the same single day; the winning pair
        // covers every observed day, so without the cap the tie would carry
        // full confidence.
        let resolution = resolve(&[
            obs("ad1", "as1", "c1", "2025-06-01"),
            obs("ad1", "as2", "c1", "2025-06-01"),
        ]);
        let edge = &resolution.edges[0];
        assert!(edge.ambiguous);
        assert_eq!(edge.confidence, 0.5);
    }

    #[test]
    fn test_duplicate_same_day_observations_count_once() {
        // Two raw rows on one day must not outvote two distinct days.
        let resolution = resolve(&[
            obs("ad1", "as1", "c1", "2025-06-01"),
            obs("ad1", "as1", "c1", "2025-06-01"),
            obs("ad1", "as2", "c1", "2025-06-02"),
            obs("ad1", "as2", "c1", "2025-06-03"),
        ]);
        let edge = &resolution.edges[0];
        assert_eq!(edge.adset_id, "as2");
        // 2 winning days of 3 total observed days.
        assert!((edge.confidence - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_losing_candidates_retained_for_audit() {
        let resolution = resolve(&[
            obs("ad1", "as1", "c1", "2025-06-01"),
            obs("ad1", "as1", "c1", "2025-06-02"),
            obs("ad1", "as2", "c1", "2025-06-03"),
        ]);
        assert_eq!(resolution.candidates.len(), 2);
        let loser = resolution
            .candidates
            .iter()
            .find(|c| c.adset_id == "as2")
            .unwrap();
        assert_eq!(loser.observed_days, 1);
    }

    #[test]
    fn test_multiple_ads_resolved_independently() {
        let resolution = resolve(&[
            obs("ad1", "as1", "c1", "2025-06-01"),
            obs("ad2", "as9", "c2", "2025-06-01"),
        ]);
        assert_eq!(resolution.edges.len(), 2);
        assert_eq!(resolution.edges[0].ad_id, "ad1");
        assert_eq!(resolution.edges[1].ad_id, "ad2");
    }

    #[test]
    fn test_empty_observations() {
        let resolution = resolve(&[]);
        assert!(resolution.edges.is_empty());
        assert!(resolution.candidates.is_empty());
    }
}
