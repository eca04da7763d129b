//! Recompute Orchestration
//!
//! Drives a full recompute run:
//!
//! 1. refresh the canonical-name and hierarchy relations from the platform
//!    evidence feeds;
//! 2. snapshot them into an immutable [`RunContext`];
//! 3. split the scope into `(entity_type, date)` partitions;
//! 4. compute and commit each partition independently, in parallel on the
//!    rayon pool, with bounded retry on upstream failure;
//! 5. persist and return the [`RunSummary`].
//!
//! Partitions never share mutable state; one partition failing its retry
//! budget marks the run incomplete but stops nothing else. A committed
//! partition is never rolled back by a later partition's failure. A
//! resolver refresh that exhausts its retries degrades the run to empty
//! name/hierarchy snapshots (counted in the quality report) rather than
//! blocking the numeric aggregation.

use crate::recon::aggregator::Aggregator;
use crate::recon::config::ReconConfig;
use crate::recon::context::RunContext;
use crate::recon::event_store::EventStore;
use crate::recon::faults::{Fault, PartitionId, PartitionOutcome, RunQuality, RunSummary};
use crate::recon::hierarchy;
use crate::recon::metric_store::MetricStore;
use crate::recon::model::{DateWindow, EntityType};
use crate::recon::name_resolver;
use crate::recon::platform_store::ExternalMetricStore;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct Orchestrator<'a> {
    events: &'a dyn EventStore,
    platform: &'a dyn ExternalMetricStore,
    metrics: &'a MetricStore,
    config: &'a ReconConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        events: &'a dyn EventStore,
        platform: &'a dyn ExternalMetricStore,
        metrics: &'a MetricStore,
        config: &'a ReconConfig,
    ) -> Self {
        Self {
            events,
            platform,
            metrics,
            config,
        }
    }

    /// Recompute every partition of `entity_types x window` and persist the
    /// results. Safe to re-run over the same scope at any time: unchanged
    /// inputs produce byte-identical output rows.
    pub fn recompute(
        &self,
        entity_types: &[EntityType],
        window: DateWindow,
    ) -> Result<RunSummary> {
        let started_at = chrono::Utc::now();
        let clock = Instant::now();

        // Name/hierarchy evidence only feeds display lookups; when it stays
        // unavailable past the retry budget the run degrades to empty
        // snapshots instead of blocking the numeric aggregation. Previously
        // persisted relations are left untouched.
        let mut resolver_faults = 0u64;
        let ctx = match self.refresh_resolvers(window) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "resolver refresh failed; running with empty snapshots");
                resolver_faults = 1;
                RunContext::new(window, Vec::new(), Vec::new())
            }
        };
        info!(
            run_id = %ctx.run_id,
            window = %window,
            names = ctx.name_count(),
            "recompute run starting"
        );

        let partitions: Vec<PartitionId> = entity_types
            .iter()
            .flat_map(|&entity_type| {
                window.days().map(move |date| PartitionId { entity_type, date })
            })
            .collect();

        let results: Vec<(PartitionOutcome, RunQuality)> = if self.config.parallel {
            partitions
                .par_iter()
                .map(|&partition| self.run_partition(&ctx, partition))
                .collect()
        } else {
            partitions
                .iter()
                .map(|&partition| self.run_partition(&ctx, partition))
                .collect()
        };

        let mut quality = RunQuality {
            partitions_expected: partitions.len() as u64,
            ambiguous_hierarchy_edges: ctx.ambiguous_edge_count(),
            resolver_faults,
            ..Default::default()
        };
        let mut outcomes = Vec::with_capacity(results.len());
        for (outcome, partition_quality) in results {
            quality.merge(&partition_quality);
            if outcome.committed {
                quality.partitions_committed += 1;
            } else {
                quality.partitions_failed += 1;
            }
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(|o| o.partition);

        let summary = RunSummary {
            run_id: ctx.run_id,
            entity_types: entity_types.to_vec(),
            window,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            quality,
            partitions: outcomes,
        };
        self.metrics
            .record_run_summary(&summary)
            .context("failed to persist run summary")?;

        info!(
            run_id = %summary.run_id,
            committed = summary.quality.partitions_committed,
            failed = summary.quality.partitions_failed,
            rejected_events = summary.quality.events_rejected,
            duration_ms = summary.duration_ms,
            complete = summary.is_complete(),
            "recompute run finished"
        );
        Ok(summary)
    }

    /// Single-type convenience used by the CLI; `None` means all types.
    pub fn recompute_scope(
        &self,
        entity_type: Option<EntityType>,
        window: DateWindow,
    ) -> Result<RunSummary> {
        match entity_type {
            Some(t) => self.recompute(&[t], window),
            None => self.recompute(EntityType::all(), window),
        }
    }

    /// Re-derive names and hierarchy from the evidence feeds, persist both
    /// relations, and snapshot them for the run. Runs under the same retry
    /// budget as a partition since it reads the same upstream.
    fn refresh_resolvers(&self, window: DateWindow) -> Result<RunContext> {
        let mut last_error = None;
        for attempt in 1..=self.config.max_attempts {
            match self.try_refresh_resolvers(window) {
                Ok(ctx) => return Ok(ctx),
                Err(e) => {
                    warn!(attempt, error = %e, "resolver refresh failed");
                    last_error = Some(e);
                    self.backoff(attempt);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("resolver refresh failed")))
    }

    fn try_refresh_resolvers(&self, window: DateWindow) -> Result<RunContext> {
        let names = name_resolver::resolve_all(&self.platform.name_records()?);
        let resolution = hierarchy::resolve(&self.platform.hierarchy_observations()?);
        self.metrics.replace_canonical_names(&names)?;
        self.metrics.replace_hierarchy(&resolution)?;

        for edge in resolution.edges.iter().filter(|e| e.ambiguous) {
            let top_days = resolution
                .candidates
                .iter()
                .filter(|c| c.ad_id == edge.ad_id)
                .map(|c| c.observed_days)
                .max()
                .unwrap_or(0);
            let tied_candidates = resolution
                .candidates
                .iter()
                .filter(|c| c.ad_id == edge.ad_id && c.observed_days == top_days)
                .count() as u32;
            warn!(
                "{}",
                Fault::AmbiguousHierarchy {
                    ad_id: edge.ad_id.clone(),
                    tied_candidates,
                }
            );
        }

        Ok(RunContext::new(window, names, resolution.edges))
    }

    /// Compute and commit one partition under the retry budget. Never
    /// returns an error: failure is data, recorded in the outcome.
    fn run_partition(
        &self,
        ctx: &RunContext,
        partition: PartitionId,
    ) -> (PartitionOutcome, RunQuality) {
        let aggregator = Aggregator::new(self.events, self.platform, self.config);
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_attempts {
            let output = match aggregator.compute_partition(ctx, partition) {
                Ok(output) => output,
                Err(e) => {
                    // Upstream unavailability; worth the backoff.
                    warn!(partition = %partition, attempt, error = %e, "partition compute failed");
                    last_error = format!("source unavailable: {:#}", e);
                    self.backoff(attempt);
                    continue;
                }
            };

            if output.withheld() {
                // A consistency fault is deterministic; retrying cannot
                // clear it. Previously committed rows stay authoritative.
                warn!(
                    partition = %partition,
                    faults = output.quality.consistency_faults,
                    "partition withheld from commit"
                );
                return (
                    PartitionOutcome {
                        partition,
                        attempts: attempt,
                        committed: false,
                        fingerprint: None,
                        error: Some(format!(
                            "{} consistency violation(s)",
                            output.quality.consistency_faults
                        )),
                    },
                    output.quality,
                );
            }

            match self
                .metrics
                .commit_partition(partition, &output.rows, output.fingerprint)
            {
                Ok(()) => {
                    return (
                        PartitionOutcome {
                            partition,
                            attempts: attempt,
                            committed: true,
                            fingerprint: Some(output.fingerprint),
                            error: None,
                        },
                        output.quality,
                    );
                }
                Err(e) => {
                    warn!(partition = %partition, attempt, error = %e, "partition commit failed");
                    last_error = format!("commit failed: {:#}", e);
                    self.backoff(attempt);
                }
            }
        }

        (
            PartitionOutcome {
                partition,
                attempts: self.config.max_attempts,
                committed: false,
                fingerprint: None,
                error: Some(last_error),
            },
            RunQuality::default(),
        )
    }

    /// Linear backoff; skipped after the final attempt.
    fn backoff(&self, attempt: u32) {
        if attempt < self.config.max_attempts && self.config.retry_backoff_ms > 0 {
            std::thread::sleep(Duration::from_millis(
                attempt as u64 * self.config.retry_backoff_ms,
            ));
        }
    }
}
