//! Fault Taxonomy and Run Quality Accounting
//!
//! Every fault class the engine can raise, plus the per-run quality counters
//! exposed after a recompute. No fault is silently swallowed: every rejected
//! record and every failed partition is counted and surfaced.
//!
//! # Containment Policy
//!
//! - `Referential`: one bad event; reject it, log it, keep the partition.
//! - `SourceUnavailable`: one partition; retried on backoff, others run on.
//! - `Consistency`: the partition's output is withheld; previously committed
//!   rows stay authoritative until the fault is resolved.
//! - `AmbiguousHierarchy`: recorded only; aggregation does not need parents.
//! - Resolver evidence failure: name/hierarchy snapshots degrade to empty
//!   for the run (previously persisted relations keep serving reads); the
//!   numeric aggregation is unaffected and still runs.

use crate::recon::model::{Day, EntityDayKey, EntityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// FAULTS
// =============================================================================

/// Identifier of one unit of work: `(entity_type, date)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    pub entity_type: EntityType,
    pub date: Day,
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.entity_type, self.date)
    }
}

/// One breakdown field whose child sum disagrees with the parent row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyViolation {
    pub key: EntityDayKey,
    pub breakdown_type: crate::recon::model::BreakdownType,
    pub field: String,
    pub parent_value: f64,
    pub children_sum: f64,
}

/// Typed fault record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Fault {
    /// An event references a user_id absent from the profile relation.
    Referential {
        user_id: String,
        event_type: crate::recon::model::EventType,
        event_time: DateTime<Utc>,
    },
    /// An upstream store could not serve a partition.
    SourceUnavailable {
        partition: PartitionId,
        detail: String,
    },
    /// Breakdown-sum-vs-parent invariant violated after computation.
    Consistency(ConsistencyViolation),
    /// Hierarchy election tied for an ad; non-blocking, audit only.
    AmbiguousHierarchy {
        ad_id: String,
        tied_candidates: u32,
    },
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Referential {
                user_id,
                event_type,
                event_time,
            } => write!(
                f,
                "referential fault: {} event at {} references unknown user {}",
                event_type, event_time, user_id
            ),
            Self::SourceUnavailable { partition, detail } => {
                write!(f, "source unavailable for partition {}: {}", partition, detail)
            }
            Self::Consistency(v) => write!(
                f,
                "consistency fault at {} ({}): field {} parent={} children_sum={}",
                v.key, v.breakdown_type, v.field, v.parent_value, v.children_sum
            ),
            Self::AmbiguousHierarchy {
                ad_id,
                tied_candidates,
            } => write!(
                f,
                "ambiguous hierarchy for ad {}: {} candidates tied",
                ad_id, tied_candidates
            ),
        }
    }
}

impl std::error::Error for Fault {}

// =============================================================================
// RUN QUALITY
// =============================================================================

/// Per-run quality counters, exposed to operators after every recompute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunQuality {
    pub partitions_expected: u64,
    pub partitions_committed: u64,
    pub partitions_failed: u64,
    pub events_seen: u64,
    pub events_rejected: u64,
    pub consistency_faults: u64,
    pub ambiguous_hierarchy_edges: u64,
    /// Nonzero when the run proceeded without fresh name/hierarchy snapshots.
    #[serde(default)]
    pub resolver_faults: u64,
}

impl RunQuality {
    /// Fraction of expected partitions successfully committed.
    pub fn commit_fraction(&self) -> f64 {
        if self.partitions_expected > 0 {
            self.partitions_committed as f64 / self.partitions_expected as f64
        } else {
            0.0
        }
    }

    /// Fraction of observed events rejected.
    pub fn rejection_fraction(&self) -> f64 {
        if self.events_seen > 0 {
            self.events_rejected as f64 / self.events_seen as f64
        } else {
            0.0
        }
    }

    /// A run is complete only when every partition committed.
    pub fn is_complete(&self) -> bool {
        self.partitions_expected > 0
            && self.partitions_committed == self.partitions_expected
    }

    /// Fold another quality record into this one.
    pub fn merge(&mut self, other: &RunQuality) {
        self.partitions_expected += other.partitions_expected;
        self.partitions_committed += other.partitions_committed;
        self.partitions_failed += other.partitions_failed;
        self.events_seen += other.events_seen;
        self.events_rejected += other.events_rejected;
        self.consistency_faults += other.consistency_faults;
        self.ambiguous_hierarchy_edges += other.ambiguous_hierarchy_edges;
        self.resolver_faults += other.resolver_faults;
    }
}

// =============================================================================
// RUN SUMMARY
// =============================================================================

/// Outcome of one partition across all its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionOutcome {
    pub partition: PartitionId,
    pub attempts: u32,
    pub committed: bool,
    /// Deterministic hash over the committed rows, for external idempotence
    /// checks. Absent when the partition never committed.
    pub fingerprint: Option<u64>,
    pub error: Option<String>,
}

/// Persisted record of one recompute run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: uuid::Uuid,
    pub entity_types: Vec<EntityType>,
    pub window: crate::recon::model::DateWindow,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub quality: RunQuality,
    pub partitions: Vec<PartitionOutcome>,
}

impl RunSummary {
    /// A run is complete when every expected partition committed.
    pub fn is_complete(&self) -> bool {
        self.quality.is_complete()
    }
}
