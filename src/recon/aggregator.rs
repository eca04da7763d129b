//! Daily Aggregation Engine
//!
//! Computes the full output of one partition - every aggregate and breakdown
//! metric row for one `(entity_type, date)` - from the two upstream streams.
//!
//! # Pipeline (per entity)
//!
//! ```text
//!   profiles ──┐
//!              ├─> referential check ──> dedup cohorts ──┐
//!   events  ───┘        (reject orphans)                 ├─> MetricBody
//!                                                        │   + derive()
//!   platform dailies ────────────────────────────────────┘
//!                                │
//!                                └─> breakdown rows per dimension
//!                                        │
//!                                        └─> verify_breakdown_sums
//! ```
//!
//! Aggregate and breakdown rows are cut from the same deduplicated cohorts,
//! so the sum invariant holds by construction; the verification pass exists
//! to catch regressions in this module, not to patch data. Any violation
//! withholds the whole partition from commit.
//!
//! The engine reads the stores through their traits and mutates nothing; all
//! run-scoped state arrives in the [`RunContext`].

use crate::recon::calc;
use crate::recon::config::ReconConfig;
use crate::recon::consistency::{self, DimensionExclusions};
use crate::recon::context::RunContext;
use crate::recon::dedup::{self, DailyCohorts};
use crate::recon::event_store::EventStore;
use crate::recon::faults::{Fault, PartitionId, RunQuality};
use crate::recon::model::{
    BreakdownDailyMetric, BreakdownType, DateWindow, Day, EntityDailyMetric, EntityDayKey,
    EntityType, EventType, LifecycleEvent, MetricBody, PlatformDaily, UserProfile,
};
use crate::recon::platform_store::ExternalMetricStore;
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

/// Everything one partition computation produced. The orchestrator decides
/// whether it commits (it does not when consistency faults are present).
#[derive(Debug, Clone)]
pub struct PartitionOutput {
    pub partition: PartitionId,
    /// One entry per entity with activity: the aggregate row plus its
    /// breakdown children, ordered by entity id.
    pub rows: Vec<(EntityDailyMetric, Vec<BreakdownDailyMetric>)>,
    pub faults: Vec<Fault>,
    /// Event/consistency counters for this partition only; partition-level
    /// counters are the orchestrator's.
    pub quality: RunQuality,
    /// Deterministic hash over the ordered rows.
    pub fingerprint: u64,
}

impl PartitionOutput {
    /// True when a consistency fault makes this output uncommittable.
    pub fn withheld(&self) -> bool {
        self.quality.consistency_faults > 0
    }
}

/// Per-partition aggregation engine. Cheap to construct; holds no state
/// beyond the store handles and config.
pub struct Aggregator<'a> {
    events: &'a dyn EventStore,
    platform: &'a dyn ExternalMetricStore,
    config: &'a ReconConfig,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        events: &'a dyn EventStore,
        platform: &'a dyn ExternalMetricStore,
        config: &'a ReconConfig,
    ) -> Self {
        Self {
            events,
            platform,
            config,
        }
    }

    /// Compute every row of one `(entity_type, date)` partition.
    ///
    /// Dedup always runs over the full run window, then this partition's
    /// date is sliced out, so a user's cohort assignment is identical no
    /// matter which partition observes them.
    pub fn compute_partition(
        &self,
        ctx: &RunContext,
        partition: PartitionId,
    ) -> Result<PartitionOutput> {
        let mut rows = Vec::new();
        let mut faults = Vec::new();
        let mut quality = RunQuality::default();

        for entity_id in self.entity_ids_for(partition.entity_type, ctx)? {
            if let Some(entry) = self.compute_entity(
                ctx,
                partition,
                &entity_id,
                &mut faults,
                &mut quality,
            )? {
                rows.push(entry);
            }
        }

        let fingerprint = fingerprint_rows(&rows)?;
        debug!(
            partition = %partition,
            rows = rows.len(),
            rejected = quality.events_rejected,
            fingerprint = format_args!("{:016x}", fingerprint),
            "partition computed"
        );

        Ok(PartitionOutput {
            partition,
            rows,
            faults,
            quality,
            fingerprint,
        })
    }

    /// Union of event-side and platform-side entity ids, sorted.
    fn entity_ids_for(&self, entity_type: EntityType, ctx: &RunContext) -> Result<Vec<String>> {
        let mut ids = self.events.entity_ids(entity_type)?;
        ids.extend(self.platform.entity_ids(entity_type, ctx.window)?);
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Compute one entity's aggregate row and breakdown children for the
    /// partition date. Returns `None` when the row is zero-activity and the
    /// config says to skip such rows.
    fn compute_entity(
        &self,
        ctx: &RunContext,
        partition: PartitionId,
        entity_id: &str,
        faults: &mut Vec<Fault>,
        quality: &mut RunQuality,
    ) -> Result<Option<(EntityDailyMetric, Vec<BreakdownDailyMetric>)>> {
        let profiles = self.events.profiles_for_entity(partition.entity_type, entity_id)?;
        let profile_index: HashMap<&str, &UserProfile> =
            profiles.iter().map(|p| (p.user_id.as_str(), p)).collect();

        let raw_events =
            self.events
                .events_for_entity(partition.entity_type, entity_id, ctx.window)?;

        // Referential check: an event whose user has no profile row is
        // rejected, never silently dropped or half-counted. Every partition
        // re-reads the full window, so counters and faults belong to the
        // partition matching the event's own date; run totals then count
        // each record exactly once.
        let mut accepted = Vec::with_capacity(raw_events.len());
        for event in raw_events {
            let counted_here = event.day() == partition.date;
            if counted_here {
                quality.events_seen += 1;
            }
            if profile_index.contains_key(event.user_id.as_str()) {
                accepted.push(event);
            } else if counted_here {
                warn!(
                    user_id = %event.user_id,
                    event_type = %event.event_type,
                    "rejecting event with unknown user"
                );
                quality.events_rejected += 1;
                faults.push(Fault::Referential {
                    user_id: event.user_id.clone(),
                    event_type: event.event_type,
                    event_time: event.event_time,
                });
            }
        }

        let day_window = DateWindow::single_day(partition.date);
        let platform_rows =
            self.platform
                .daily_metrics(partition.entity_type, entity_id, day_window, None)?;
        let platform = fold_platform_rows(partition.date, &platform_rows);

        let key = EntityDayKey {
            entity_type: partition.entity_type,
            entity_id: entity_id.to_string(),
            date: partition.date,
        };
        let parent = EntityDailyMetric {
            key: key.clone(),
            body: build_body(&accepted, ctx.window, partition.date, &platform),
        };

        if self.config.skip_zero_activity_rows && parent.body.is_zero_activity() {
            return Ok(None);
        }

        let mut children = Vec::new();
        for &breakdown_type in &self.config.breakdown_types {
            let (mut dim_children, exclusions) = self.compute_breakdown(
                &key,
                breakdown_type,
                &accepted,
                &profile_index,
                ctx,
                partition.date,
                entity_id,
            )?;

            for violation in consistency::verify_breakdown_sums(
                &parent,
                breakdown_type,
                &dim_children,
                &exclusions,
            ) {
                warn!(
                    key = %violation.key,
                    breakdown = %violation.breakdown_type,
                    field = %violation.field,
                    parent = violation.parent_value,
                    children = violation.children_sum,
                    "breakdown sum disagrees with parent"
                );
                quality.consistency_faults += 1;
                faults.push(Fault::Consistency(violation));
            }

            children.append(&mut dim_children);
        }

        Ok(Some((parent, children)))
    }

    /// One dimension's breakdown rows for one entity, plus the exclusion
    /// totals for users missing the dimension.
    #[allow(clippy::too_many_arguments)]
    fn compute_breakdown(
        &self,
        key: &EntityDayKey,
        breakdown_type: BreakdownType,
        accepted: &[LifecycleEvent],
        profile_index: &HashMap<&str, &UserProfile>,
        ctx: &RunContext,
        date: Day,
        entity_id: &str,
    ) -> Result<(Vec<BreakdownDailyMetric>, DimensionExclusions)> {
        // Partition the accepted events by the owning user's dimension value.
        // Users without the value are excluded from every breakdown row but
        // measured so the consistency check can reconcile the parent.
        let mut by_value: BTreeMap<String, Vec<LifecycleEvent>> = BTreeMap::new();
        let mut excluded_events: Vec<LifecycleEvent> = Vec::new();
        for event in accepted {
            let value = profile_index
                .get(event.user_id.as_str())
                .and_then(|p| p.breakdown_value(breakdown_type));
            match value {
                Some(v) => by_value.entry(v.to_string()).or_default().push(event.clone()),
                None => excluded_events.push(event.clone()),
            }
        }

        let day_window = DateWindow::single_day(date);
        let platform_rows = self.platform.daily_metrics(
            key.entity_type,
            entity_id,
            day_window,
            Some(breakdown_type),
        )?;
        let mut platform_by_value: BTreeMap<String, PlatformDaily> = BTreeMap::new();
        for row in platform_rows {
            if let Some(value) = row.breakdown_value.clone() {
                platform_by_value.insert(value, row);
            }
        }
        // Platform-only values still get a row (internal side all zero).
        for value in platform_by_value.keys() {
            by_value.entry(value.clone()).or_default();
        }

        let mut children = Vec::new();
        for (value, events) in &by_value {
            let platform = platform_by_value
                .get(value)
                .cloned()
                .unwrap_or_else(|| PlatformDaily::empty(date));
            let body = build_body(events, ctx.window, date, &platform);
            if body.is_zero_activity() {
                continue;
            }
            children.push(BreakdownDailyMetric {
                key: key.clone(),
                breakdown_type,
                breakdown_value: value.clone(),
                body,
            });
        }

        let exclusions = measure_exclusions(&excluded_events, ctx.window, date);
        Ok((children, exclusions))
    }
}

// =============================================================================
// ROW CONSTRUCTION
// =============================================================================

/// Deduplicated cohorts for every event series, over the full window.
struct CohortSet {
    trials: DailyCohorts,
    purchases: DailyCohorts,
    renewals: DailyCohorts,
    cancellations: DailyCohorts,
    refunds: DailyCohorts,
    trial_refunds: DailyCohorts,
}

impl CohortSet {
    fn from_events(events: &[LifecycleEvent], window: DateWindow) -> Self {
        Self {
            trials: dedup::dedup_single_type(events, window, EventType::TrialStarted),
            purchases: dedup::dedup_purchases(events, window),
            renewals: dedup::dedup_single_type(events, window, EventType::Renewal),
            cancellations: dedup::dedup_single_type(events, window, EventType::Cancellation),
            refunds: dedup::dedup_single_type(events, window, EventType::Refund),
            trial_refunds: dedup::dedup_single_type(events, window, EventType::TrialRefund),
        }
    }
}

/// Build one metric body from events (deduplicated over `window`, sliced at
/// `date`) and the platform row for the same date.
fn build_body(
    events: &[LifecycleEvent],
    window: DateWindow,
    date: Day,
    platform: &PlatformDaily,
) -> MetricBody {
    let cohorts = CohortSet::from_events(events, window);

    let mut body = MetricBody {
        trial_user_count: cohorts.trials.count_for(date),
        purchase_user_count: cohorts.purchases.count_for(date),
        renewal_user_count: cohorts.renewals.count_for(date),
        cancellation_user_count: cohorts.cancellations.count_for(date),
        refund_user_count: cohorts.refunds.count_for(date),
        trial_refund_user_count: cohorts.trial_refunds.count_for(date),
        trial_user_ids: cohorts.trials.members_for(date).to_vec(),
        purchase_user_ids: cohorts.purchases.members_for(date).to_vec(),
        trial_revenue: cohorts.trials.revenue_for(date),
        purchase_revenue: cohorts.purchases.revenue_for(date),
        refunded_revenue: cohorts.refunds.revenue_for(date)
            + cohorts.trial_refunds.revenue_for(date),
        platform_trial_count: platform.platform_trial_count,
        platform_purchase_count: platform.platform_purchase_count,
        spend: platform.spend,
        impressions: platform.impressions,
        clicks: platform.clicks,
        derived: calc::DerivedMetrics::default(),
    };

    body.derived = calc::derive(&calc::ReconInputs {
        internal_trials: body.trial_user_count,
        internal_purchases: body.purchase_user_count,
        internal_refunds: body.refund_user_count,
        internal_trial_refunds: body.trial_refund_user_count,
        platform_trials: body.platform_trial_count,
        platform_purchases: body.platform_purchase_count,
        spend: body.spend,
        impressions: body.impressions,
        clicks: body.clicks,
        trial_revenue: body.trial_revenue,
        purchase_revenue: body.purchase_revenue,
    });

    body
}

/// Exclusion totals for users missing a breakdown dimension: the same dedup
/// slice the breakdown rows use, so the consistency check reconciles exactly.
fn measure_exclusions(
    excluded_events: &[LifecycleEvent],
    window: DateWindow,
    date: Day,
) -> DimensionExclusions {
    let cohorts = CohortSet::from_events(excluded_events, window);
    DimensionExclusions {
        trial_user_count: cohorts.trials.count_for(date),
        purchase_user_count: cohorts.purchases.count_for(date),
        renewal_user_count: cohorts.renewals.count_for(date),
        cancellation_user_count: cohorts.cancellations.count_for(date),
        refund_user_count: cohorts.refunds.count_for(date),
        trial_refund_user_count: cohorts.trial_refunds.count_for(date),
        trial_revenue: cohorts.trials.revenue_for(date),
        purchase_revenue: cohorts.purchases.revenue_for(date),
        refunded_revenue: cohorts.refunds.revenue_for(date)
            + cohorts.trial_refunds.revenue_for(date),
    }
}

/// Sum multiple platform rows for one date into one aggregate. Normally at
/// most one row exists; folding keeps the engine robust to upstream splits.
fn fold_platform_rows(date: Day, rows: &[PlatformDaily]) -> PlatformDaily {
    let mut folded = PlatformDaily::empty(date);
    for row in rows {
        folded.spend += row.spend;
        folded.impressions += row.impressions;
        folded.clicks += row.clicks;
        folded.platform_trial_count += row.platform_trial_count;
        folded.platform_purchase_count += row.platform_purchase_count;
    }
    folded
}

/// Deterministic hash over the ordered rows. Rows serialize identically for
/// identical inputs (sorted ids, sorted memberships, BTreeMap grouping), so
/// two runs over unchanged inputs produce the same fingerprint. A row that
/// fails to serialize fails the whole computation; a fingerprint over a
/// subset of the rows would be worse than none.
pub fn fingerprint_rows(rows: &[(EntityDailyMetric, Vec<BreakdownDailyMetric>)]) -> Result<u64> {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (entity_row, breakdown_rows) in rows {
        serde_json::to_string(entity_row)?.hash(&mut hasher);
        for row in breakdown_rows {
            serde_json::to_string(row)?.hash(&mut hasher);
        }
    }
    Ok(hasher.finish())
}
