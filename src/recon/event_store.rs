//! Event Store Read Side
//!
//! Read-only access to the internal behavioral-analytics stream: per-user
//! lifecycle events and per-user attribution/profile records. The engine
//! never writes here; the insert helpers on the SQLite implementation exist
//! for the ingestion boundary and test fixtures.
//!
//! Two implementations:
//! - [`SqliteEventStore`]: WAL-mode SQLite, the production store.
//! - [`MemoryEventStore`]: in-memory vectors for tests; unlike the SQLite
//!   join, it can serve events whose user has no profile row, which is how
//!   referential-fault handling gets exercised.

use crate::recon::model::{
    DateWindow, Day, EntityType, EventType, LifecycleEvent, UserProfile,
};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Read contract the aggregator depends on.
///
/// Implementations return data only; referential validation (an event whose
/// user is unknown) happens in the aggregator so no implementation can
/// silently drop bad records.
pub trait EventStore: Send + Sync {
    /// Profiles attributed to the given entity (attribution non-null and
    /// equal to `entity_id`).
    fn profiles_for_entity(&self, entity_type: EntityType, entity_id: &str)
        -> Result<Vec<UserProfile>>;

    /// Lifecycle events inside `window` for users attributed to the entity.
    fn events_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        window: DateWindow,
    ) -> Result<Vec<LifecycleEvent>>;

    /// Distinct entity ids of the given type with at least one attributed user.
    fn entity_ids(&self, entity_type: EntityType) -> Result<Vec<String>>;
}

// =============================================================================
// SQLITE IMPLEMENTATION
// =============================================================================

/// Event-side schema. Event times are unix seconds (UTC); day keys are
/// ISO-8601 date strings.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS user_profiles (
    user_id TEXT PRIMARY KEY,
    attributed_campaign_id TEXT,
    attributed_adset_id TEXT,
    attributed_ad_id TEXT,
    first_seen_date TEXT NOT NULL,
    country TEXT,
    device TEXT,
    region TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_profiles_campaign
    ON user_profiles(attributed_campaign_id) WHERE attributed_campaign_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_profiles_adset
    ON user_profiles(attributed_adset_id) WHERE attributed_adset_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_profiles_ad
    ON user_profiles(attributed_ad_id) WHERE attributed_ad_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS lifecycle_events (
    event_id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    event_time INTEGER NOT NULL,
    revenue_amount REAL NOT NULL DEFAULT 0,
    currency TEXT NOT NULL DEFAULT 'USD'
);

CREATE INDEX IF NOT EXISTS idx_events_user_time
    ON lifecycle_events(user_id, event_time);
"#;

/// SQLite-backed event store.
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&path, flags)
            .with_context(|| format!("failed to open event store at {}", path.as_ref().display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize event store schema")?;
        info!(path = %path.as_ref().display(), "event store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory event store")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize event store schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Ingestion-boundary helper; the engine itself never calls this.
    pub fn insert_profile(&self, profile: &UserProfile) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO user_profiles
             (user_id, attributed_campaign_id, attributed_adset_id, attributed_ad_id,
              first_seen_date, country, device, region)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                profile.user_id,
                profile.attributed_campaign_id,
                profile.attributed_adset_id,
                profile.attributed_ad_id,
                profile.first_seen_date.to_string(),
                profile.country,
                profile.device,
                profile.region,
            ],
        )?;
        Ok(())
    }

    /// Ingestion-boundary helper; the engine itself never calls this.
    pub fn insert_event(&self, event: &LifecycleEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO lifecycle_events (user_id, event_type, event_time, revenue_amount, currency)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.user_id,
                event.event_type.as_str(),
                event.event_time.timestamp(),
                event.revenue_amount,
                event.currency,
            ],
        )?;
        Ok(())
    }

    fn attribution_column(entity_type: EntityType) -> &'static str {
        match entity_type {
            EntityType::Campaign => "attributed_campaign_id",
            EntityType::AdSet => "attributed_adset_id",
            EntityType::Ad => "attributed_ad_id",
        }
    }
}

/// Unix-second bounds `[start, end)` covering an inclusive day window.
fn window_epoch_bounds(window: DateWindow) -> (i64, i64) {
    let start = Utc
        .from_utc_datetime(&window.start.and_hms_opt(0, 0, 0).expect("valid midnight"))
        .timestamp();
    let end_day = window.end + chrono::Duration::days(1);
    let end = Utc
        .from_utc_datetime(&end_day.and_hms_opt(0, 0, 0).expect("valid midnight"))
        .timestamp();
    (start, end)
}

fn parse_day(s: &str) -> rusqlite::Result<Day> {
    s.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn parse_event_type(s: &str) -> rusqlite::Result<EventType> {
    EventType::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown event_type {:?}", s).into(),
        )
    })
}

impl EventStore for SqliteEventStore {
    fn profiles_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<UserProfile>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT user_id, attributed_campaign_id, attributed_adset_id, attributed_ad_id,
                    first_seen_date, country, device, region
             FROM user_profiles WHERE {} = ?1 ORDER BY user_id",
            Self::attribution_column(entity_type)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![entity_id], |row| {
            let first_seen: String = row.get(4)?;
            Ok(UserProfile {
                user_id: row.get(0)?,
                attributed_campaign_id: row.get(1)?,
                attributed_adset_id: row.get(2)?,
                attributed_ad_id: row.get(3)?,
                first_seen_date: parse_day(&first_seen)?,
                country: row.get(5)?,
                device: row.get(6)?,
                region: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read profiles")
    }

    fn events_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        window: DateWindow,
    ) -> Result<Vec<LifecycleEvent>> {
        let (start, end) = window_epoch_bounds(window);
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT e.user_id, e.event_type, e.event_time, e.revenue_amount, e.currency
             FROM lifecycle_events e
             JOIN user_profiles p ON p.user_id = e.user_id
             WHERE p.{} = ?1 AND e.event_time >= ?2 AND e.event_time < ?3
             ORDER BY e.event_time, e.event_id",
            Self::attribution_column(entity_type)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![entity_id, start, end], |row| {
            let event_type: String = row.get(1)?;
            let epoch: i64 = row.get(2)?;
            let event_time: DateTime<Utc> = Utc
                .timestamp_opt(epoch, 0)
                .single()
                .ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Integer,
                        format!("unrepresentable event_time {}", epoch).into(),
                    )
                })?;
            Ok(LifecycleEvent {
                user_id: row.get(0)?,
                event_type: parse_event_type(&event_type)?,
                event_time,
                revenue_amount: row.get(3)?,
                currency: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read lifecycle events")
    }

    fn entity_ids(&self, entity_type: EntityType) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let column = Self::attribution_column(entity_type);
        let sql = format!(
            "SELECT DISTINCT {col} FROM user_profiles WHERE {col} IS NOT NULL ORDER BY {col}",
            col = column
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list attributed entity ids")
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION (TESTS AND FIXTURES)
// =============================================================================

/// Vector-backed store. Events are returned for an entity when their user's
/// profile is attributed to it, plus any events whose user has no profile at
/// all (so referential-fault paths can be exercised).
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    profiles: Vec<UserProfile>,
    events: Vec<LifecycleEvent>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(mut self, profiles: Vec<UserProfile>) -> Self {
        self.profiles.extend(profiles);
        self
    }

    pub fn with_events(mut self, events: Vec<LifecycleEvent>) -> Self {
        self.events.extend(events);
        self
    }

    pub fn push_profile(&mut self, profile: UserProfile) {
        self.profiles.push(profile);
    }

    pub fn push_event(&mut self, event: LifecycleEvent) {
        self.events.push(event);
    }

    fn has_profile(&self, user_id: &str) -> bool {
        self.profiles.iter().any(|p| p.user_id == user_id)
    }
}

impl EventStore for MemoryEventStore {
    fn profiles_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<UserProfile>> {
        Ok(self
            .profiles
            .iter()
            .filter(|p| p.attribution(entity_type) == Some(entity_id))
            .cloned()
            .collect())
    }

    fn events_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        window: DateWindow,
    ) -> Result<Vec<LifecycleEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| window.contains(e.day()))
            .filter(|e| {
                let attributed = self
                    .profiles
                    .iter()
                    .any(|p| p.user_id == e.user_id && p.attribution(entity_type) == Some(entity_id));
                // Orphan events surface everywhere so the aggregator's
                // referential check sees them.
                attributed || !self.has_profile(&e.user_id)
            })
            .cloned()
            .collect())
    }

    fn entity_ids(&self, entity_type: EntityType) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .profiles
            .iter()
            .filter_map(|p| p.attribution(entity_type).map(str::to_string))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn profile(user: &str, campaign: Option<&str>) -> UserProfile {
        UserProfile {
            user_id: user.to_string(),
            attributed_campaign_id: campaign.map(str::to_string),
            attributed_adset_id: None,
            attributed_ad_id: None,
            first_seen_date: day("2025-06-01"),
            country: Some("US".to_string()),
            device: None,
            region: None,
        }
    }

    fn event_at(user: &str, ty: EventType, date: &str, revenue: f64) -> LifecycleEvent {
        let d: Day = date.parse().unwrap();
        LifecycleEvent {
            user_id: user.to_string(),
            event_type: ty,
            event_time: Utc.from_utc_datetime(&d.and_hms_opt(8, 30, 0).unwrap()),
            revenue_amount: revenue,
            currency: "USD".to_string(),
        }
    }

    #[test]
    fn test_sqlite_roundtrip() {
        let store = SqliteEventStore::in_memory().unwrap();
        store.insert_profile(&profile("u1", Some("c1"))).unwrap();
        store.insert_profile(&profile("u2", Some("c2"))).unwrap();
        store
            .insert_event(&event_at("u1", EventType::TrialStarted, "2025-07-02", 0.0))
            .unwrap();
        store
            .insert_event(&event_at("u2", EventType::TrialStarted, "2025-07-02", 0.0))
            .unwrap();

        let window = DateWindow::new(day("2025-07-01"), day("2025-07-05")).unwrap();
        let events = store
            .events_for_entity(EntityType::Campaign, "c1", window)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "u1");
        assert_eq!(events[0].event_type, EventType::TrialStarted);

        let profiles = store
            .profiles_for_entity(EntityType::Campaign, "c1")
            .unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].country.as_deref(), Some("US"));

        let ids = store.entity_ids(EntityType::Campaign).unwrap();
        assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn test_sqlite_window_bounds_inclusive() {
        let store = SqliteEventStore::in_memory().unwrap();
        store.insert_profile(&profile("u1", Some("c1"))).unwrap();
        for date in ["2025-06-30", "2025-07-01", "2025-07-05", "2025-07-06"] {
            store
                .insert_event(&event_at("u1", EventType::Renewal, date, 1.0))
                .unwrap();
        }
        let window = DateWindow::new(day("2025-07-01"), day("2025-07-05")).unwrap();
        let events = store
            .events_for_entity(EntityType::Campaign, "c1", window)
            .unwrap();
        // Both boundary days included, both outside days excluded.
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_memory_store_surfaces_orphan_events() {
        let store = MemoryEventStore::new()
            .with_profiles(vec![profile("u1", Some("c1"))])
            .with_events(vec![
                event_at("u1", EventType::TrialStarted, "2025-07-02", 0.0),
                event_at("ghost", EventType::TrialStarted, "2025-07-02", 0.0),
            ]);
        let window = DateWindow::new(day("2025-07-01"), day("2025-07-05")).unwrap();
        let events = store
            .events_for_entity(EntityType::Campaign, "c1", window)
            .unwrap();
        // The orphan rides along; rejecting it is the aggregator's job.
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_unattributed_profiles_excluded_from_entity_ids() {
        let store = MemoryEventStore::new()
            .with_profiles(vec![profile("u1", Some("c1")), profile("u2", None)]);
        let ids = store.entity_ids(EntityType::Campaign).unwrap();
        assert_eq!(ids, vec!["c1".to_string()]);
    }
}
