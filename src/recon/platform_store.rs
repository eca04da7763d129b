//! External Metric Store Read Side
//!
//! Read-only access to the ad-platform-reported stream: daily spend,
//! impressions, clicks, and platform-counted trial/purchase totals per
//! advertising entity, optionally broken down by dimension. This stream is
//! also the evidence feed for name and hierarchy resolution (the platform
//! reports a display name and parent chain alongside each daily row).
//!
//! Aggregate rows carry an empty breakdown discriminator; breakdown rows
//! carry `(breakdown_type, breakdown_value)`. The two never mix in one query.

use crate::recon::model::{
    BreakdownType, DateWindow, Day, EntityNameRecord, EntityRef, EntityType, HierarchyObservation,
    PlatformDaily,
};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Read contract for the platform-reported stream.
pub trait ExternalMetricStore: Send + Sync {
    /// Daily platform rows for an entity over a window. `breakdown = None`
    /// returns aggregate rows; `Some(bt)` returns per-value rows for that
    /// dimension only.
    fn daily_metrics(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        window: DateWindow,
        breakdown: Option<BreakdownType>,
    ) -> Result<Vec<PlatformDaily>>;

    /// Distinct entity ids of a type with platform activity in the window.
    fn entity_ids(&self, entity_type: EntityType, window: DateWindow) -> Result<Vec<String>>;

    /// Full observed-name evidence feed (append-only upstream).
    fn name_records(&self) -> Result<Vec<EntityNameRecord>>;

    /// Full ad/ad-set/campaign co-occurrence feed.
    fn hierarchy_observations(&self) -> Result<Vec<HierarchyObservation>>;
}

// =============================================================================
// SQLITE IMPLEMENTATION
// =============================================================================

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;
PRAGMA temp_store = MEMORY;

-- Aggregate rows use breakdown_type = '' AND breakdown_value = ''.
CREATE TABLE IF NOT EXISTS platform_daily_metrics (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    date TEXT NOT NULL,
    breakdown_type TEXT NOT NULL DEFAULT '',
    breakdown_value TEXT NOT NULL DEFAULT '',
    spend REAL NOT NULL DEFAULT 0,
    impressions INTEGER NOT NULL DEFAULT 0,
    clicks INTEGER NOT NULL DEFAULT 0,
    platform_trial_count INTEGER NOT NULL DEFAULT 0,
    platform_purchase_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (entity_type, entity_id, date, breakdown_type, breakdown_value)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_platform_daily_date
    ON platform_daily_metrics(entity_type, date);

CREATE TABLE IF NOT EXISTS entity_name_records (
    record_id INTEGER PRIMARY KEY,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    observed_name TEXT NOT NULL,
    observation_date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_name_records_entity
    ON entity_name_records(entity_type, entity_id);

CREATE TABLE IF NOT EXISTS hierarchy_observations (
    ad_id TEXT NOT NULL,
    adset_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    date TEXT NOT NULL,
    PRIMARY KEY (ad_id, adset_id, campaign_id, date)
) WITHOUT ROWID;
"#;

/// SQLite-backed platform metric store.
pub struct SqlitePlatformStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePlatformStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&path, flags).with_context(|| {
            format!("failed to open platform store at {}", path.as_ref().display())
        })?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize platform store schema")?;
        info!(path = %path.as_ref().display(), "platform store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory platform store")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize platform store schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Ingestion-boundary helper; the engine itself never calls this.
    pub fn insert_daily(
        &self,
        entity: &EntityRef,
        breakdown: Option<(BreakdownType, &str)>,
        row: &PlatformDaily,
    ) -> Result<()> {
        let (bt, bv) = match breakdown {
            Some((t, v)) => (t.as_str(), v),
            None => ("", ""),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO platform_daily_metrics
             (entity_type, entity_id, date, breakdown_type, breakdown_value,
              spend, impressions, clicks, platform_trial_count, platform_purchase_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entity.entity_type.as_str(),
                entity.entity_id,
                row.date.to_string(),
                bt,
                bv,
                row.spend,
                row.impressions,
                row.clicks,
                row.platform_trial_count,
                row.platform_purchase_count,
            ],
        )?;
        Ok(())
    }

    /// Ingestion-boundary helper; the engine itself never calls this.
    pub fn insert_name_record(&self, record: &EntityNameRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entity_name_records (entity_type, entity_id, observed_name, observation_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.entity.entity_type.as_str(),
                record.entity.entity_id,
                record.observed_name,
                record.observation_date.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Ingestion-boundary helper; the engine itself never calls this.
    pub fn insert_hierarchy_observation(&self, obs: &HierarchyObservation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO hierarchy_observations (ad_id, adset_id, campaign_id, date)
             VALUES (?1, ?2, ?3, ?4)",
            params![obs.ad_id, obs.adset_id, obs.campaign_id, obs.date.to_string()],
        )?;
        Ok(())
    }
}

fn parse_day_sql(s: &str, column: usize) -> rusqlite::Result<Day> {
    s.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
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

impl ExternalMetricStore for SqlitePlatformStore {
    fn daily_metrics(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        window: DateWindow,
        breakdown: Option<BreakdownType>,
    ) -> Result<Vec<PlatformDaily>> {
        let bt = breakdown.map_or("", |b| b.as_str());
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT date, spend, impressions, clicks,
                    platform_trial_count, platform_purchase_count, breakdown_value
             FROM platform_daily_metrics
             WHERE entity_type = ?1 AND entity_id = ?2
               AND date >= ?3 AND date <= ?4 AND breakdown_type = ?5
             ORDER BY date, breakdown_value",
        )?;
        let rows = stmt.query_map(
            params![
                entity_type.as_str(),
                entity_id,
                window.start.to_string(),
                window.end.to_string(),
                bt,
            ],
            |row| {
                let date: String = row.get(0)?;
                let breakdown_value: String = row.get(6)?;
                Ok(PlatformDaily {
                    date: parse_day_sql(&date, 0)?,
                    spend: row.get(1)?,
                    impressions: row.get(2)?,
                    clicks: row.get(3)?,
                    platform_trial_count: row.get(4)?,
                    platform_purchase_count: row.get(5)?,
                    breakdown_value: if breakdown_value.is_empty() {
                        None
                    } else {
                        Some(breakdown_value)
                    },
                })
            },
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read platform daily metrics")
    }

    fn entity_ids(&self, entity_type: EntityType, window: DateWindow) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT entity_id FROM platform_daily_metrics
             WHERE entity_type = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY entity_id",
        )?;
        let rows = stmt.query_map(
            params![entity_type.as_str(), window.start.to_string(), window.end.to_string()],
            |row| row.get::<_, String>(0),
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list platform entity ids")
    }

    fn name_records(&self) -> Result<Vec<EntityNameRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT entity_type, entity_id, observed_name, observation_date
             FROM entity_name_records ORDER BY record_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let entity_type: String = row.get(0)?;
            let date: String = row.get(3)?;
            Ok(EntityNameRecord {
                entity: EntityRef {
                    entity_type: parse_entity_type_sql(&entity_type)?,
                    entity_id: row.get(1)?,
                },
                observed_name: row.get(2)?,
                observation_date: parse_day_sql(&date, 3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read name records")
    }

    fn hierarchy_observations(&self) -> Result<Vec<HierarchyObservation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT ad_id, adset_id, campaign_id, date
             FROM hierarchy_observations ORDER BY ad_id, date",
        )?;
        let rows = stmt.query_map([], |row| {
            let date: String = row.get(3)?;
            Ok(HierarchyObservation {
                ad_id: row.get(0)?,
                adset_id: row.get(1)?,
                campaign_id: row.get(2)?,
                date: parse_day_sql(&date, 3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read hierarchy observations")
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION (TESTS AND FIXTURES)
// =============================================================================

/// Vector-backed platform store with optional transient-failure injection,
/// used to exercise the orchestrator's retry path.
#[derive(Debug, Default)]
pub struct MemoryPlatformStore {
    rows: Vec<(EntityRef, Option<BreakdownType>, PlatformDaily)>,
    names: Vec<EntityNameRecord>,
    observations: Vec<HierarchyObservation>,
    failures_remaining: Mutex<u32>,
}

impl MemoryPlatformStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_daily(
        &mut self,
        entity: EntityRef,
        breakdown: Option<BreakdownType>,
        row: PlatformDaily,
    ) {
        self.rows.push((entity, breakdown, row));
    }

    pub fn push_name_record(&mut self, record: EntityNameRecord) {
        self.names.push(record);
    }

    pub fn push_observation(&mut self, obs: HierarchyObservation) {
        self.observations.push(obs);
    }

    /// Fail the next `n` reads with an error before recovering.
    pub fn inject_transient_failures(&self, n: u32) {
        *self.failures_remaining.lock() = n;
    }

    fn check_availability(&self) -> Result<()> {
        let mut remaining = self.failures_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            anyhow::bail!("injected transient failure ({} left)", *remaining);
        }
        Ok(())
    }
}

impl ExternalMetricStore for MemoryPlatformStore {
    fn daily_metrics(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        window: DateWindow,
        breakdown: Option<BreakdownType>,
    ) -> Result<Vec<PlatformDaily>> {
        self.check_availability()?;
        Ok(self
            .rows
            .iter()
            .filter(|(entity, bt, row)| {
                entity.entity_type == entity_type
                    && entity.entity_id == entity_id
                    && *bt == breakdown
                    && window.contains(row.date)
            })
            .map(|(_, _, row)| row.clone())
            .collect())
    }

    fn entity_ids(&self, entity_type: EntityType, window: DateWindow) -> Result<Vec<String>> {
        self.check_availability()?;
        let mut ids: Vec<String> = self
            .rows
            .iter()
            .filter(|(entity, _, row)| {
                entity.entity_type == entity_type && window.contains(row.date)
            })
            .map(|(entity, _, _)| entity.entity_id.clone())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn name_records(&self) -> Result<Vec<EntityNameRecord>> {
        self.check_availability()?;
        Ok(self.names.clone())
    }

    fn hierarchy_observations(&self) -> Result<Vec<HierarchyObservation>> {
        self.check_availability()?;
        Ok(self.observations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn window(start: &str, end: &str) -> DateWindow {
        DateWindow::new(day(start), day(end)).unwrap()
    }

    fn daily(date: &str, spend: f64, trials: i64) -> PlatformDaily {
        PlatformDaily {
            date: day(date),
            spend,
            impressions: 100,
            clicks: 10,
            platform_trial_count: trials,
            platform_purchase_count: 0,
            breakdown_value: None,
        }
    }

    #[test]
    fn test_sqlite_aggregate_and_breakdown_rows_separate() {
        let store = SqlitePlatformStore::in_memory().unwrap();
        let entity = EntityRef::new(EntityType::Campaign, "c1");
        store.insert_daily(&entity, None, &daily("2025-07-02", 100.0, 50)).unwrap();
        store
            .insert_daily(
                &entity,
                Some((BreakdownType::Country, "US")),
                &daily("2025-07-02", 60.0, 30),
            )
            .unwrap();
        store
            .insert_daily(
                &entity,
                Some((BreakdownType::Country, "CA")),
                &daily("2025-07-02", 40.0, 20),
            )
            .unwrap();

        let w = window("2025-07-01", "2025-07-05");
        let aggregate = store
            .daily_metrics(EntityType::Campaign, "c1", w, None)
            .unwrap();
        assert_eq!(aggregate.len(), 1);
        assert_eq!(aggregate[0].spend, 100.0);
        assert_eq!(aggregate[0].breakdown_value, None);

        let by_country = store
            .daily_metrics(EntityType::Campaign, "c1", w, Some(BreakdownType::Country))
            .unwrap();
        assert_eq!(by_country.len(), 2);
        assert_eq!(by_country[0].breakdown_value.as_deref(), Some("CA"));
        assert_eq!(by_country[1].breakdown_value.as_deref(), Some("US"));
    }

    #[test]
    fn test_sqlite_evidence_feeds_roundtrip() {
        let store = SqlitePlatformStore::in_memory().unwrap();
        store
            .insert_name_record(&EntityNameRecord {
                entity: EntityRef::new(EntityType::Campaign, "c1"),
                observed_name: "Summer Sale".to_string(),
                observation_date: day("2025-07-01"),
            })
            .unwrap();
        store
            .insert_hierarchy_observation(&HierarchyObservation {
                ad_id: "ad1".to_string(),
                adset_id: "as1".to_string(),
                campaign_id: "c1".to_string(),
                date: day("2025-07-01"),
            })
            .unwrap();

        assert_eq!(store.name_records().unwrap().len(), 1);
        assert_eq!(store.hierarchy_observations().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_transient_failures() {
        let mut store = MemoryPlatformStore::new();
        store.push_daily(
            EntityRef::new(EntityType::Campaign, "c1"),
            None,
            daily("2025-07-02", 10.0, 5),
        );
        store.inject_transient_failures(2);

        let w = window("2025-07-01", "2025-07-05");
        assert!(store.daily_metrics(EntityType::Campaign, "c1", w, None).is_err());
        assert!(store.daily_metrics(EntityType::Campaign, "c1", w, None).is_err());
        // Third attempt recovers.
        let rows = store.daily_metrics(EntityType::Campaign, "c1", w, None).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
