//! Daily Reconciliation & Aggregation Engine
//!
//! Joins the internal behavioral event stream with ad-platform-reported
//! metrics into one authoritative per-day metric row per advertising entity,
//! with per-dimension breakdown rows, accuracy ratios, and adjusted revenue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐              ┌──────────────────────┐
//! │   EventStore     │              │ ExternalMetricStore  │
//! │ (profiles +      │              │ (platform dailies +  │
//! │  lifecycle       │              │  name / hierarchy    │
//! │  events)         │              │  evidence)           │
//! └────────┬─────────┘              └──────────┬───────────┘
//!          │                                   │
//!          │            ┌──────────────────────┼──────────────┐
//!          │            │                      ▼              ▼
//!          │            │            ┌──────────────┐ ┌──────────────┐
//!          │            │            │ NameResolver │ │ Hierarchy    │
//!          │            │            │ (mode vote)  │ │ (day-count   │
//!          │            │            └──────┬───────┘ │  election)   │
//!          │            │                   │         └──────┬───────┘
//!          │            │                   └───────┬────────┘
//!          │            │                           ▼
//!          │            │                   ┌──────────────┐
//!          │            │                   │  RunContext  │
//!          │            │                   │  (snapshot)  │
//!          │            │                   └──────┬───────┘
//!          ▼            ▼                          │
//! ┌─────────────────────────────────────────────┐  │
//! │                Orchestrator                 │◀─┘
//! │  (entity_type, date) partitions, rayon,     │
//! │   bounded retry, commit-or-withhold         │
//! └──────────────────────┬──────────────────────┘
//!                        ▼
//! ┌─────────────────────────────────────────────┐
//! │                 Aggregator                  │
//! │  referential check → dedup → calc::derive   │
//! │  breakdown rows → verify_breakdown_sums     │
//! └──────────────────────┬──────────────────────┘
//!                        ▼
//! ┌─────────────────────────────────────────────┐
//! │                 MetricStore                 │
//! │  whole-partition transactional replace,     │
//! │  NotComputed signal, run summaries          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Deduplication**: a user counts once per event series per window, on
//!   their latest in-window event date (dedup.rs is the single source).
//! - **Guarded math**: no division ever yields NaN or infinity; zero
//!   denominators yield exactly 0.0 (calc.rs).
//! - **Sum invariant**: breakdown rows sum to their parent, exactly for
//!   counts and within epsilon for currency; violations withhold the
//!   partition (consistency.rs).
//! - **Idempotence**: recomputing an unchanged partition commits
//!   byte-identical rows and an identical fingerprint.
//! - **Isolation**: partitions share no mutable state; a reader never sees
//!   a half-written partition.

pub mod aggregator;
pub mod calc;
pub mod config;
pub mod consistency;
pub mod context;
pub mod dedup;
pub mod event_store;
pub mod faults;
pub mod hierarchy;
pub mod metric_store;
pub mod model;
pub mod name_resolver;
pub mod orchestrator;
pub mod platform_store;


// Re-exports for convenience
pub use aggregator::{Aggregator, PartitionOutput};
pub use calc::{DerivedMetrics, ReconInputs};
pub use config::ReconConfig;
pub use context::RunContext;
pub use dedup::DailyCohorts;
pub use event_store::{EventStore, MemoryEventStore, SqliteEventStore};
pub use faults::{
    ConsistencyViolation, Fault, PartitionId, PartitionOutcome, RunQuality, RunSummary,
};
pub use hierarchy::HierarchyResolution;
pub use metric_store::{MetricLookup, MetricStore};
pub use model::{
    BreakdownDailyMetric, BreakdownType, CanonicalName, DateWindow, Day, EntityDailyMetric,
    EntityDayKey, EntityNameRecord, EntityRef, EntityType, EventType, HierarchyCandidate,
    HierarchyEdge, HierarchyObservation, LifecycleEvent, MetricBody, PlatformDaily, UserProfile,
};
pub use orchestrator::Orchestrator;
pub use platform_store::{ExternalMetricStore, MemoryPlatformStore, SqlitePlatformStore};
