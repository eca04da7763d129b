//! Metric Store
//!
//! SQLite-backed output relations for the reconciliation engine: one row per
//! `(entity_type, entity_id, date)` and one per breakdown key, plus the
//! derived canonical-name and hierarchy relations and per-run summaries.
//!
//! # Write Discipline
//!
//! The only write operation for metric rows is **whole-partition replace
//! inside one transaction**: delete every row for `(entity_type, date)`,
//! insert the staged replacement set, record the partition commit marker.
//! Readers never observe a half-written key, and re-running a partition with
//! unchanged inputs is byte-idempotent. There is no row-by-row mutation API.
//!
//! # Not-Computed Signal
//!
//! A `(entity, date)` whose partition never committed reads back as
//! [`MetricLookup::NotComputed`] - explicitly distinguishable from a
//! committed zero-activity day - so the serving layer never renders a
//! zero-filled row for data that simply is not there.

use crate::recon::faults::{PartitionId, RunSummary};
use crate::recon::hierarchy::HierarchyResolution;
use crate::recon::model::{
    BreakdownDailyMetric, BreakdownType, CanonicalName, Day, EntityDailyMetric, EntityDayKey,
    EntityRef, EntityType, HierarchyCandidate, HierarchyEdge, MetricBody,
};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Schema version for migrations.
/// Version history:
/// - v1: Initial schema
const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS entity_daily_metrics (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    date TEXT NOT NULL,
    trial_user_count INTEGER NOT NULL,
    purchase_user_count INTEGER NOT NULL,
    renewal_user_count INTEGER NOT NULL,
    cancellation_user_count INTEGER NOT NULL,
    refund_user_count INTEGER NOT NULL,
    trial_refund_user_count INTEGER NOT NULL,
    trial_user_ids TEXT NOT NULL,
    purchase_user_ids TEXT NOT NULL,
    trial_revenue REAL NOT NULL,
    purchase_revenue REAL NOT NULL,
    refunded_revenue REAL NOT NULL,
    platform_trial_count INTEGER NOT NULL,
    platform_purchase_count INTEGER NOT NULL,
    spend REAL NOT NULL,
    impressions INTEGER NOT NULL,
    clicks INTEGER NOT NULL,
    derived_json TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id, date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS breakdown_daily_metrics (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    date TEXT NOT NULL,
    breakdown_type TEXT NOT NULL,
    breakdown_value TEXT NOT NULL,
    trial_user_count INTEGER NOT NULL,
    purchase_user_count INTEGER NOT NULL,
    renewal_user_count INTEGER NOT NULL,
    cancellation_user_count INTEGER NOT NULL,
    refund_user_count INTEGER NOT NULL,
    trial_refund_user_count INTEGER NOT NULL,
    trial_user_ids TEXT NOT NULL,
    purchase_user_ids TEXT NOT NULL,
    trial_revenue REAL NOT NULL,
    purchase_revenue REAL NOT NULL,
    refunded_revenue REAL NOT NULL,
    platform_trial_count INTEGER NOT NULL,
    platform_purchase_count INTEGER NOT NULL,
    spend REAL NOT NULL,
    impressions INTEGER NOT NULL,
    clicks INTEGER NOT NULL,
    derived_json TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id, date, breakdown_type, breakdown_value)
) WITHOUT ROWID;

-- One marker per committed partition; the read-side "computed" signal.
CREATE TABLE IF NOT EXISTS partition_commits (
    entity_type TEXT NOT NULL,
    date TEXT NOT NULL,
    committed_at INTEGER NOT NULL,
    fingerprint TEXT NOT NULL,
    entity_rows INTEGER NOT NULL,
    breakdown_rows INTEGER NOT NULL,
    PRIMARY KEY (entity_type, date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS canonical_names (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    name TEXT NOT NULL,
    observations INTEGER NOT NULL,
    last_observed TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS hierarchy_edges (
    ad_id TEXT PRIMARY KEY,
    adset_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    confidence REAL NOT NULL,
    ambiguous INTEGER NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
) WITHOUT ROWID;

-- Every observed parent pairing, winners included, for audit.
CREATE TABLE IF NOT EXISTS hierarchy_candidates (
    ad_id TEXT NOT NULL,
    adset_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    observed_days INTEGER NOT NULL,
    PRIMARY KEY (ad_id, adset_id, campaign_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS run_summaries (
    run_id TEXT PRIMARY KEY,
    started_at INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    partitions_committed INTEGER NOT NULL,
    partitions_failed INTEGER NOT NULL,
    summary_json TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_run_summaries_started
    ON run_summaries(started_at DESC);
"#;

/// Read result for one `(entity, date)` key.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricLookup {
    /// No partition for this `(entity_type, date)` has ever committed.
    NotComputed,
    /// The partition committed but this entity had no activity that day.
    ZeroActivity,
    /// Committed row.
    Computed(EntityDailyMetric),
}

/// SQLite-backed metric store.
pub struct MetricStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetricStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&path, flags)
            .with_context(|| format!("failed to open metric store at {}", path.as_ref().display()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        info!(path = %path.as_ref().display(), "metric store opened");
        Ok(store)
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory metric store")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;

        match current_version {
            None => {
                conn.execute_batch(SCHEMA_SQL)?;
                conn.execute("INSERT INTO schema_version (version) VALUES (?)", [SCHEMA_VERSION])?;
                info!("created metric store schema v{}", SCHEMA_VERSION);
            }
            Some(v) if v == SCHEMA_VERSION => {
                debug!("metric store schema at v{}", SCHEMA_VERSION);
            }
            Some(v) => {
                anyhow::bail!(
                    "metric store schema version mismatch: expected {}, got {}",
                    SCHEMA_VERSION,
                    v
                );
            }
        }

        Ok(())
    }

    // =========================================================================
    // PARTITION COMMIT (the only metric-row write path)
    // =========================================================================

    /// Atomically replace every metric row of one `(entity_type, date)`
    /// partition. Either the full staged output lands, or nothing does.
    pub fn commit_partition(
        &self,
        partition: PartitionId,
        rows: &[(EntityDailyMetric, Vec<BreakdownDailyMetric>)],
        fingerprint: u64,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let date_str = partition.date.to_string();
        let type_str = partition.entity_type.as_str();

        tx.execute(
            "DELETE FROM entity_daily_metrics WHERE entity_type = ?1 AND date = ?2",
            params![type_str, date_str],
        )?;
        tx.execute(
            "DELETE FROM breakdown_daily_metrics WHERE entity_type = ?1 AND date = ?2",
            params![type_str, date_str],
        )?;

        let mut entity_rows = 0i64;
        let mut breakdown_rows = 0i64;
        {
            let mut insert_entity = tx.prepare_cached(&format!(
                "INSERT INTO entity_daily_metrics
                 (entity_type, entity_id, date, {})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                         ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                BODY_COLUMNS
            ))?;
            let mut insert_breakdown = tx.prepare_cached(&format!(
                "INSERT INTO breakdown_daily_metrics
                 (entity_type, entity_id, date, breakdown_type, breakdown_value, {})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                         ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                BODY_COLUMNS
            ))?;

            for (row, children) in rows {
                let body = body_params(&row.body)?;
                insert_entity.execute(rusqlite::params_from_iter(
                    key_params(&row.key).into_iter().chain(body),
                ))?;
                entity_rows += 1;

                for child in children {
                    let body = body_params(&child.body)?;
                    let prefix = key_params(&child.key).into_iter().chain([
                        Value::from(child.breakdown_type.as_str().to_string()),
                        Value::from(child.breakdown_value.clone()),
                    ]);
                    insert_breakdown.execute(rusqlite::params_from_iter(prefix.chain(body)))?;
                    breakdown_rows += 1;
                }
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO partition_commits
             (entity_type, date, committed_at, fingerprint, entity_rows, breakdown_rows)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                type_str,
                date_str,
                chrono::Utc::now().timestamp(),
                format!("{:016x}", fingerprint),
                entity_rows,
                breakdown_rows,
            ],
        )?;

        tx.commit()?;
        debug!(
            partition = %partition,
            entities = entity_rows,
            breakdowns = breakdown_rows,
            "partition committed"
        );
        Ok(())
    }

    // =========================================================================
    // READ SIDE
    // =========================================================================

    /// Whether the partition covering this key has ever committed.
    pub fn partition_committed(&self, partition: PartitionId) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM partition_commits WHERE entity_type = ?1 AND date = ?2",
                params![partition.entity_type.as_str(), partition.date.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Committed fingerprint for a partition, if any.
    pub fn partition_fingerprint(&self, partition: PartitionId) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT fingerprint FROM partition_commits WHERE entity_type = ?1 AND date = ?2",
            params![partition.entity_type.as_str(), partition.date.to_string()],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read partition fingerprint")
    }

    /// Fetch one aggregate row with the explicit not-computed signal.
    pub fn fetch_entity_daily(&self, key: &EntityDayKey) -> Result<MetricLookup> {
        if !self.partition_committed(PartitionId {
            entity_type: key.entity_type,
            date: key.date,
        })? {
            return Ok(MetricLookup::NotComputed);
        }

        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM entity_daily_metrics
                     WHERE entity_type = ?1 AND entity_id = ?2 AND date = ?3",
                    BODY_COLUMNS
                ),
                params![key.entity_type.as_str(), key.entity_id, key.date.to_string()],
                |row| body_from_row(row, 0),
            )
            .optional()?;

        match row {
            Some(body) => Ok(MetricLookup::Computed(EntityDailyMetric {
                key: key.clone(),
                body,
            })),
            None => Ok(MetricLookup::ZeroActivity),
        }
    }

    /// Fetch the breakdown rows under one parent key for one dimension.
    pub fn fetch_breakdowns(
        &self,
        key: &EntityDayKey,
        breakdown_type: BreakdownType,
    ) -> Result<Vec<BreakdownDailyMetric>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT breakdown_value, {} FROM breakdown_daily_metrics
             WHERE entity_type = ?1 AND entity_id = ?2 AND date = ?3 AND breakdown_type = ?4
             ORDER BY breakdown_value",
            BODY_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![
                key.entity_type.as_str(),
                key.entity_id,
                key.date.to_string(),
                breakdown_type.as_str(),
            ],
            |row| {
                Ok(BreakdownDailyMetric {
                    key: key.clone(),
                    breakdown_type,
                    breakdown_value: row.get(0)?,
                    body: body_from_row(row, 1)?,
                })
            },
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read breakdown rows")
    }

    /// Every committed aggregate row for a partition, ordered by entity id.
    pub fn entity_rows_for_partition(
        &self,
        partition: PartitionId,
    ) -> Result<Vec<EntityDailyMetric>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT entity_id, {} FROM entity_daily_metrics
             WHERE entity_type = ?1 AND date = ?2 ORDER BY entity_id",
            BODY_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![partition.entity_type.as_str(), partition.date.to_string()],
            |row| {
                Ok(EntityDailyMetric {
                    key: EntityDayKey {
                        entity_type: partition.entity_type,
                        entity_id: row.get(0)?,
                        date: partition.date,
                    },
                    body: body_from_row(row, 1)?,
                })
            },
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read partition rows")
    }

    // =========================================================================
    // DERIVED RELATIONS (full replace per resolver run)
    // =========================================================================

    /// Full replace of the canonical-name relation.
    pub fn replace_canonical_names(&self, names: &[CanonicalName]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM canonical_names", [])?;
        for name in names {
            tx.execute(
                "INSERT INTO canonical_names (entity_type, entity_id, name, observations, last_observed)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    name.entity.entity_type.as_str(),
                    name.entity.entity_id,
                    name.name,
                    name.observations as i64,
                    name.last_observed.to_string(),
                ],
            )?;
        }
        tx.commit()?;
        debug!(names = names.len(), "canonical names replaced");
        Ok(())
    }

    /// Canonical name lookup; `None` means no evidence was ever observed.
    pub fn canonical_name(&self, entity: &EntityRef) -> Result<Option<CanonicalName>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT name, observations, last_observed FROM canonical_names
             WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity.entity_type.as_str(), entity.entity_id],
            |row| {
                let last: String = row.get(2)?;
                Ok(CanonicalName {
                    entity: entity.clone(),
                    name: row.get(0)?,
                    observations: row.get::<_, i64>(1)? as u64,
                    last_observed: parse_day_sql(&last, 2)?,
                })
            },
        )
        .optional()
        .context("failed to read canonical name")
    }

    pub fn all_canonical_names(&self) -> Result<Vec<CanonicalName>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT entity_type, entity_id, name, observations, last_observed
             FROM canonical_names ORDER BY entity_type, entity_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let entity_type: String = row.get(0)?;
            let last: String = row.get(4)?;
            Ok(CanonicalName {
                entity: EntityRef {
                    entity_type: parse_entity_type_sql(&entity_type)?,
                    entity_id: row.get(1)?,
                },
                name: row.get(2)?,
                observations: row.get::<_, i64>(3)? as u64,
                last_observed: parse_day_sql(&last, 4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read canonical names")
    }

    /// Full replace of the hierarchy relations (edges + audit candidates).
    pub fn replace_hierarchy(&self, resolution: &HierarchyResolution) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM hierarchy_edges", [])?;
        tx.execute("DELETE FROM hierarchy_candidates", [])?;
        for edge in &resolution.edges {
            tx.execute(
                "INSERT INTO hierarchy_edges
                 (ad_id, adset_id, campaign_id, confidence, ambiguous, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    edge.ad_id,
                    edge.adset_id,
                    edge.campaign_id,
                    edge.confidence,
                    edge.ambiguous as i64,
                    edge.first_seen.to_string(),
                    edge.last_seen.to_string(),
                ],
            )?;
        }
        for candidate in &resolution.candidates {
            tx.execute(
                "INSERT INTO hierarchy_candidates (ad_id, adset_id, campaign_id, observed_days)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    candidate.ad_id,
                    candidate.adset_id,
                    candidate.campaign_id,
                    candidate.observed_days as i64,
                ],
            )?;
        }
        tx.commit()?;
        debug!(
            edges = resolution.edges.len(),
            candidates = resolution.candidates.len(),
            "hierarchy relations replaced"
        );
        Ok(())
    }

    pub fn all_hierarchy_edges(&self) -> Result<Vec<HierarchyEdge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT ad_id, adset_id, campaign_id, confidence, ambiguous, first_seen, last_seen
             FROM hierarchy_edges ORDER BY ad_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let first: String = row.get(5)?;
            let last: String = row.get(6)?;
            Ok(HierarchyEdge {
                ad_id: row.get(0)?,
                adset_id: row.get(1)?,
                campaign_id: row.get(2)?,
                confidence: row.get(3)?,
                ambiguous: row.get::<_, i64>(4)? != 0,
                first_seen: parse_day_sql(&first, 5)?,
                last_seen: parse_day_sql(&last, 6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read hierarchy edges")
    }

    pub fn hierarchy_candidates_for(&self, ad_id: &str) -> Result<Vec<HierarchyCandidate>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT ad_id, adset_id, campaign_id, observed_days
             FROM hierarchy_candidates WHERE ad_id = ?1
             ORDER BY observed_days DESC, adset_id, campaign_id",
        )?;
        let rows = stmt.query_map(params![ad_id], |row| {
            Ok(HierarchyCandidate {
                ad_id: row.get(0)?,
                adset_id: row.get(1)?,
                campaign_id: row.get(2)?,
                observed_days: row.get::<_, i64>(3)? as u64,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read hierarchy candidates")
    }

    // =========================================================================
    // RUN SUMMARIES
    // =========================================================================

    pub fn record_run_summary(&self, summary: &RunSummary) -> Result<()> {
        let blob = serde_json::to_string(summary).context("failed to serialize run summary")?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO run_summaries
             (run_id, started_at, duration_ms, window_start, window_end,
              partitions_committed, partitions_failed, summary_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                summary.run_id.to_string(),
                summary.started_at.timestamp(),
                summary.duration_ms as i64,
                summary.window.start.to_string(),
                summary.window.end.to_string(),
                summary.quality.partitions_committed as i64,
                summary.quality.partitions_failed as i64,
                blob,
            ],
        )?;
        Ok(())
    }

    pub fn fetch_run_summary(&self, run_id: &str) -> Result<Option<RunSummary>> {
        let conn = self.conn.lock();
        let blob: Option<String> = conn
            .query_row(
                "SELECT summary_json FROM run_summaries WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("failed to deserialize run summary")?,
            )),
            None => Ok(None),
        }
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

/// Body columns in insert/select order; kept in one place so the two row
/// mappers and every query agree.
const BODY_COLUMNS: &str = "trial_user_count, purchase_user_count, renewal_user_count, \
     cancellation_user_count, refund_user_count, trial_refund_user_count, \
     trial_user_ids, purchase_user_ids, trial_revenue, purchase_revenue, refunded_revenue, \
     platform_trial_count, platform_purchase_count, spend, impressions, clicks, derived_json";

fn key_params(key: &EntityDayKey) -> [Value; 3] {
    [
        Value::from(key.entity_type.as_str().to_string()),
        Value::from(key.entity_id.clone()),
        Value::from(key.date.to_string()),
    ]
}

/// Bind values for the body columns, in `BODY_COLUMNS` order.
fn body_params(body: &MetricBody) -> Result<[Value; 17]> {
    Ok([
        Value::from(body.trial_user_count),
        Value::from(body.purchase_user_count),
        Value::from(body.renewal_user_count),
        Value::from(body.cancellation_user_count),
        Value::from(body.refund_user_count),
        Value::from(body.trial_refund_user_count),
        Value::from(serde_json::to_string(&body.trial_user_ids)?),
        Value::from(serde_json::to_string(&body.purchase_user_ids)?),
        Value::from(body.trial_revenue),
        Value::from(body.purchase_revenue),
        Value::from(body.refunded_revenue),
        Value::from(body.platform_trial_count),
        Value::from(body.platform_purchase_count),
        Value::from(body.spend),
        Value::from(body.impressions),
        Value::from(body.clicks),
        Value::from(serde_json::to_string(&body.derived)?),
    ])
}

fn body_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<MetricBody> {
    let trial_ids: String = row.get(offset + 6)?;
    let purchase_ids: String = row.get(offset + 7)?;
    let derived_json: String = row.get(offset + 16)?;
    let parse_json = |s: &str, col: usize| -> rusqlite::Result<_> {
        serde_json::from_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
    };
    Ok(MetricBody {
        trial_user_count: row.get(offset)?,
        purchase_user_count: row.get(offset + 1)?,
        renewal_user_count: row.get(offset + 2)?,
        cancellation_user_count: row.get(offset + 3)?,
        refund_user_count: row.get(offset + 4)?,
        trial_refund_user_count: row.get(offset + 5)?,
        trial_user_ids: parse_json(&trial_ids, offset + 6)?,
        purchase_user_ids: parse_json(&purchase_ids, offset + 7)?,
        trial_revenue: row.get(offset + 8)?,
        purchase_revenue: row.get(offset + 9)?,
        refunded_revenue: row.get(offset + 10)?,
        platform_trial_count: row.get(offset + 11)?,
        platform_purchase_count: row.get(offset + 12)?,
        spend: row.get(offset + 13)?,
        impressions: row.get(offset + 14)?,
        clicks: row.get(offset + 15)?,
        derived: serde_json::from_str(&derived_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 16,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
    })
}

fn parse_day_sql(s: &str, column: usize) -> rusqlite::Result<Day> {
    s.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_entity_type_sql(s: &str) -> rusqlite::Result<EntityType> {
    EntityType::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown entity_type {:?}", s).into(),
        )
    })
}
