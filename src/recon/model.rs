//! Core Domain Model
//!
//! Shared types for the daily reconciliation engine: advertising entities,
//! user lifecycle events, platform-reported dailies, and the metric rows the
//! engine emits.
//!
//! # Conventions
//!
//! - All day-granularity keys use `Day` (a calendar date, UTC).
//! - Event timestamps are `DateTime<Utc>`; the owning day of an event is
//!   `event_time.date_naive()`.
//! - Monetary values are `f64` in major currency units. Cross-row currency
//!   comparisons go through `consistency::CURRENCY_EPSILON`, never `==`.
//! - Membership sets (the user ids behind a count) are kept sorted so that
//!   serialized output is deterministic across runs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Calendar date (UTC) used as the day key everywhere in the engine.
pub type Day = NaiveDate;

// =============================================================================
// ENTITIES
// =============================================================================

/// Advertising entity kind. Forms the outer level of every metric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Campaign,
    AdSet,
    Ad,
}

impl EntityType {
    pub fn all() -> &'static [EntityType] {
        &[Self::Campaign, Self::AdSet, Self::Ad]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Campaign => "campaign",
            Self::AdSet => "adset",
            Self::Ad => "ad",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "campaign" => Some(Self::Campaign),
            "adset" => Some(Self::AdSet),
            "ad" => Some(Self::Ad),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(entity_type, entity_id)` pair identifying one advertising object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

// =============================================================================
// BREAKDOWN DIMENSIONS
// =============================================================================

/// Secondary partitioning axis for per-day metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownType {
    Country,
    Device,
    Region,
}

impl BreakdownType {
    pub fn all() -> &'static [BreakdownType] {
        &[Self::Country, Self::Device, Self::Region]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Device => "device",
            Self::Region => "region",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "country" => Some(Self::Country),
            "device" => Some(Self::Device),
            "region" => Some(Self::Region),
            _ => None,
        }
    }
}

impl std::fmt::Display for BreakdownType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// USERS AND LIFECYCLE EVENTS
// =============================================================================

/// One row per distinct user identity.
///
/// Attribution fields are set once at creation and treated as immutable here;
/// upstream attribution correction is out of scope. A profile with a null
/// attribution field for some entity type is excluded from that type's
/// rollups entirely (never assigned to an "unknown" bucket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub attributed_campaign_id: Option<String>,
    pub attributed_adset_id: Option<String>,
    pub attributed_ad_id: Option<String>,
    pub first_seen_date: Day,
    pub country: Option<String>,
    pub device: Option<String>,
    pub region: Option<String>,
}

impl UserProfile {
    /// Attribution id for the given entity type, if any.
    pub fn attribution(&self, entity_type: EntityType) -> Option<&str> {
        match entity_type {
            EntityType::Campaign => self.attributed_campaign_id.as_deref(),
            EntityType::AdSet => self.attributed_adset_id.as_deref(),
            EntityType::Ad => self.attributed_ad_id.as_deref(),
        }
    }

    /// Breakdown dimension value recorded on the profile, if any.
    /// A user missing the dimension is excluded from all breakdown rows for
    /// that dimension but still counted in the parent metric.
    pub fn breakdown_value(&self, breakdown: BreakdownType) -> Option<&str> {
        match breakdown {
            BreakdownType::Country => self.country.as_deref(),
            BreakdownType::Device => self.device.as_deref(),
            BreakdownType::Region => self.region.as_deref(),
        }
    }
}

/// Fixed enumeration of observed user actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TrialStarted,
    TrialConverted,
    InitialPurchase,
    Renewal,
    Cancellation,
    Refund,
    TrialRefund,
}

impl EventType {
    pub fn all() -> &'static [EventType] {
        &[
            Self::TrialStarted,
            Self::TrialConverted,
            Self::InitialPurchase,
            Self::Renewal,
            Self::Cancellation,
            Self::Refund,
            Self::TrialRefund,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrialStarted => "trial_started",
            Self::TrialConverted => "trial_converted",
            Self::InitialPurchase => "initial_purchase",
            Self::Renewal => "renewal",
            Self::Cancellation => "cancellation",
            Self::Refund => "refund",
            Self::TrialRefund => "trial_refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trial_started" => Some(Self::TrialStarted),
            "trial_converted" => Some(Self::TrialConverted),
            "initial_purchase" => Some(Self::InitialPurchase),
            "renewal" => Some(Self::Renewal),
            "cancellation" => Some(Self::Cancellation),
            "refund" => Some(Self::Refund),
            "trial_refund" => Some(Self::TrialRefund),
            _ => None,
        }
    }

    /// Event types that qualify a user for the purchase cohort.
    pub fn is_purchase(&self) -> bool {
        matches!(self, Self::TrialConverted | Self::InitialPurchase)
    }

    /// Event types that carry refund semantics.
    pub fn is_refund(&self) -> bool {
        matches!(self, Self::Refund | Self::TrialRefund)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed user action. Immutable once stored; corrections arrive as
/// new events, never as mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub user_id: String,
    pub event_type: EventType,
    pub event_time: DateTime<Utc>,
    pub revenue_amount: f64,
    pub currency: String,
}

impl LifecycleEvent {
    /// Calendar day (UTC) this event occurred on.
    pub fn day(&self) -> Day {
        self.event_time.date_naive()
    }
}

// =============================================================================
// DATE WINDOW
// =============================================================================

/// Inclusive `[start, end]` calendar window for a recompute run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: Day,
    pub end: Day,
}

impl DateWindow {
    /// Construct a window; `start` must not be after `end`.
    pub fn new(start: Day, end: Day) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn single_day(day: Day) -> Self {
        Self { start: day, end: day }
    }

    pub fn contains(&self, day: Day) -> bool {
        self.start <= day && day <= self.end
    }

    /// Number of calendar days covered (always >= 1).
    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Iterate every day of the window in ascending order.
    pub fn days(&self) -> impl Iterator<Item = Day> {
        let start = self.start;
        let n = self.day_count();
        (0..n).map(move |i| start + chrono::Duration::days(i))
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}

// =============================================================================
// PLATFORM-REPORTED DAILIES
// =============================================================================

/// One day of ad-platform-reported metrics for an entity, optionally scoped
/// to a breakdown value. `breakdown_value == None` means the aggregate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformDaily {
    pub date: Day,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub platform_trial_count: i64,
    pub platform_purchase_count: i64,
    pub breakdown_value: Option<String>,
}

impl PlatformDaily {
    /// Zero-activity row for a date where the platform reported nothing.
    pub fn empty(date: Day) -> Self {
        Self {
            date,
            spend: 0.0,
            impressions: 0,
            clicks: 0,
            platform_trial_count: 0,
            platform_purchase_count: 0,
            breakdown_value: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spend == 0.0
            && self.impressions == 0
            && self.clicks == 0
            && self.platform_trial_count == 0
            && self.platform_purchase_count == 0
    }
}

// =============================================================================
// NAME EVIDENCE AND CANONICAL NAMES
// =============================================================================

/// Append-only evidence: one historically observed display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNameRecord {
    pub entity: EntityRef,
    pub observed_name: String,
    pub observation_date: Day,
}

/// Derived: the single display name elected for an entity.
///
/// An entity with zero evidence has no `CanonicalName` row at all; callers
/// decide the fallback display, never this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalName {
    pub entity: EntityRef,
    pub name: String,
    /// How many evidence records voted for the winning name.
    pub observations: u64,
    /// Latest observation date of the winning name (the tiebreak key).
    pub last_observed: Day,
}

// =============================================================================
// HIERARCHY
// =============================================================================

/// One co-occurrence observation from the external metric stream: on `date`,
/// `ad_id` was reported under `(adset_id, campaign_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierarchyObservation {
    pub ad_id: String,
    pub adset_id: String,
    pub campaign_id: String,
    pub date: Day,
}

/// Derived: the single active parent chain for an ad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub ad_id: String,
    pub adset_id: String,
    pub campaign_id: String,
    /// Co-occurrence days of the winning parent ÷ total observed days.
    pub confidence: f64,
    /// True when two parents tied exactly; the edge is kept for display but
    /// flagged so no caller treats it as authoritative.
    pub ambiguous: bool,
    pub first_seen: Day,
    pub last_seen: Day,
}

/// Audit record: a non-winning (or tied) parent candidate for an ad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyCandidate {
    pub ad_id: String,
    pub adset_id: String,
    pub campaign_id: String,
    /// Distinct days this pairing was observed.
    pub observed_days: u64,
}

// =============================================================================
// METRIC ROWS
// =============================================================================

/// Key of one aggregate metric row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityDayKey {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub date: Day,
}

impl std::fmt::Display for EntityDayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.entity_type, self.entity_id, self.date)
    }
}

/// Numeric body shared by aggregate and breakdown rows.
///
/// Internal counts are deduplicated distinct-user counts; the membership
/// vectors list exactly the users behind each count, sorted ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricBody {
    // Internal (event-stream) side.
    pub trial_user_count: i64,
    pub purchase_user_count: i64,
    pub renewal_user_count: i64,
    pub cancellation_user_count: i64,
    pub refund_user_count: i64,
    pub trial_refund_user_count: i64,
    pub trial_user_ids: Vec<String>,
    pub purchase_user_ids: Vec<String>,
    pub trial_revenue: f64,
    pub purchase_revenue: f64,
    pub refunded_revenue: f64,

    // Platform (ad-network) side.
    pub platform_trial_count: i64,
    pub platform_purchase_count: i64,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,

    // Derived metrics (see calc.rs). Recomputed per row from the fields
    // above; never summed across rows.
    pub derived: crate::recon::calc::DerivedMetrics,
}

impl MetricBody {
    /// Total raw revenue observed on the internal side.
    pub fn raw_revenue(&self) -> f64 {
        self.trial_revenue + self.purchase_revenue
    }

    /// True when neither side observed anything.
    pub fn is_zero_activity(&self) -> bool {
        self.trial_user_count == 0
            && self.purchase_user_count == 0
            && self.renewal_user_count == 0
            && self.cancellation_user_count == 0
            && self.refund_user_count == 0
            && self.trial_refund_user_count == 0
            && self.platform_trial_count == 0
            && self.platform_purchase_count == 0
            && self.spend == 0.0
            && self.impressions == 0
            && self.clicks == 0
    }
}

/// The primary output unit: one fully-populated row per
/// `(entity_type, entity_id, date)`. Fully recomputed and replaced on each
/// run for the window being processed, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDailyMetric {
    pub key: EntityDayKey,
    pub body: MetricBody,
}

/// Same shape as [`EntityDailyMetric`] plus the breakdown dimension in the
/// key. For a fixed parent key, summed counts across breakdown rows must
/// equal the parent exactly; summed currency fields within epsilon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownDailyMetric {
    pub key: EntityDayKey,
    pub breakdown_type: BreakdownType,
    pub breakdown_value: String,
    pub body: MetricBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    #[test]
    fn test_entity_type_roundtrip() {
        for et in EntityType::all() {
            assert_eq!(EntityType::parse(et.as_str()), Some(*et));
        }
        assert_eq!(EntityType::parse("adgroup"), None);
    }

    #[test]
    fn test_event_type_roundtrip() {
        for ev in EventType::all() {
            assert_eq!(EventType::parse(ev.as_str()), Some(*ev));
        }
    }

    #[test]
    fn test_purchase_and_refund_classification() {
        assert!(EventType::TrialConverted.is_purchase());
        assert!(EventType::InitialPurchase.is_purchase());
        assert!(!EventType::TrialStarted.is_purchase());
        assert!(EventType::Refund.is_refund());
        assert!(EventType::TrialRefund.is_refund());
        assert!(!EventType::Renewal.is_refund());
    }

    #[test]
    fn test_date_window_days() {
        let w = DateWindow::new(day("2025-07-01"), day("2025-07-05")).unwrap();
        assert_eq!(w.day_count(), 5);
        let days: Vec<Day> = w.days().collect();
        assert_eq!(days.first(), Some(&day("2025-07-01")));
        assert_eq!(days.last(), Some(&day("2025-07-05")));
        assert!(w.contains(day("2025-07-03")));
        assert!(!w.contains(day("2025-07-06")));
    }

    #[test]
    fn test_date_window_rejects_inverted_range() {
        assert!(DateWindow::new(day("2025-07-05"), day("2025-07-01")).is_none());
    }

    #[test]
    fn test_profile_attribution_lookup() {
        let profile = UserProfile {
            user_id: "u1".into(),
            attributed_campaign_id: Some("c1".into()),
            attributed_adset_id: None,
            attributed_ad_id: Some("a9".into()),
            first_seen_date: day("2025-06-30"),
            country: Some("US".into()),
            device: None,
            region: Some("NA".into()),
        };
        assert_eq!(profile.attribution(EntityType::Campaign), Some("c1"));
        assert_eq!(profile.attribution(EntityType::AdSet), None);
        assert_eq!(profile.attribution(EntityType::Ad), Some("a9"));
        assert_eq!(profile.breakdown_value(BreakdownType::Country), Some("US"));
        assert_eq!(profile.breakdown_value(BreakdownType::Device), None);
    }
}
