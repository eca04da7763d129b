//! Canonical Name Resolution
//!
//! Elects one display name per `(entity_type, entity_id)` by frequency voting
//! over the historically observed names. The mode wins; ties break toward the
//! name with the most recent observation date. An entity with zero evidence
//! gets no canonical name at all - callers decide the fallback display, never
//! this module.
//!
//! The canonical name relation is recomputed wholesale on each resolver run,
//! never incrementally patched, so observed-name drift cannot accumulate.

use crate::recon::model::{CanonicalName, Day, EntityNameRecord, EntityRef};
use std::collections::HashMap;
use tracing::debug;

/// Per-candidate vote tally.
#[derive(Debug, Clone, Copy)]
struct NameVotes {
    count: u64,
    last_observed: Day,
}

/// Run the election over one entity's evidence. `None` for empty evidence.
fn elect<'a, I>(entity: &EntityRef, evidence: I) -> Option<CanonicalName>
where
    I: IntoIterator<Item = &'a EntityNameRecord>,
{
    let mut votes: HashMap<&str, NameVotes> = HashMap::new();

    for record in evidence {
        votes
            .entry(record.observed_name.as_str())
            .and_modify(|v| {
                v.count += 1;
                if record.observation_date > v.last_observed {
                    v.last_observed = record.observation_date;
                }
            })
            .or_insert(NameVotes {
                count: 1,
                last_observed: record.observation_date,
            });
    }

    let (name, winner) = votes.into_iter().max_by(|(name_a, a), (name_b, b)| {
        a.count
            .cmp(&b.count)
            .then(a.last_observed.cmp(&b.last_observed))
            // Final tiebreak on the name itself so the election stays
            // deterministic even when count and date both tie.
            .then(name_a.cmp(name_b))
    })?;

    Some(CanonicalName {
        entity: entity.clone(),
        name: name.to_string(),
        observations: winner.count,
        last_observed: winner.last_observed,
    })
}

/// Elect the canonical name for a single entity from its evidence records.
///
/// Returns `None` for empty evidence. Records for other entities are the
/// caller's bug; they are ignored rather than miscounted.
pub fn resolve_one(entity: &EntityRef, records: &[EntityNameRecord]) -> Option<CanonicalName> {
    elect(entity, records.iter().filter(|r| &r.entity == entity))
}

/// Resolve every entity present in the evidence feed.
///
/// Output is sorted by entity key so the downstream full-replace write is
/// deterministic.
pub fn resolve_all(records: &[EntityNameRecord]) -> Vec<CanonicalName> {
    let mut by_entity: HashMap<&EntityRef, Vec<&EntityNameRecord>> = HashMap::new();
    for record in records {
        by_entity.entry(&record.entity).or_default().push(record);
    }

    let mut resolved: Vec<CanonicalName> = by_entity
        .into_iter()
        .filter_map(|(entity, evidence)| elect(entity, evidence.into_iter()))
        .collect();

    resolved.sort_by(|a, b| a.entity.cmp(&b.entity));
    debug!(entities = resolved.len(), "canonical name election complete");
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon::model::EntityType;

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn record(entity_id: &str, name: &str, date: &str) -> EntityNameRecord {
        EntityNameRecord {
            entity: EntityRef::new(EntityType::Campaign, entity_id),
            observed_name: name.to_string(),
            observation_date: day(date),
        }
    }

    #[test]
    fn test_mode_wins() {
        let entity = EntityRef::new(EntityType::Campaign, "c1");
        let records = vec![
            record("c1", "Summer Sale", "2025-06-01"),
            record("c1", "Summer Sale", "2025-06-02"),
            record("c1", "Summer Sale v2", "2025-06-03"),
        ];
        let resolved = resolve_one(&entity, &records).unwrap();
        assert_eq!(resolved.name, "Summer Sale");
        assert_eq!(resolved.observations, 2);
        assert_eq!(resolved.last_observed, day("2025-06-02"));
    }

    #[test]
    fn test_tie_broken_by_latest_observation() {
        let entity = EntityRef::new(EntityType::Campaign, "c1");
        let records = vec![
            record("c1", "Old Name", "2025-06-01"),
            record("c1", "Old Name", "2025-06-02"),
            record("c1", "New Name", "2025-06-05"),
            record("c1", "New Name", "2025-06-06"),
        ];
        let resolved = resolve_one(&entity, &records).unwrap();
        assert_eq!(resolved.name, "New Name");
    }

    #[test]
    fn test_zero_evidence_yields_none() {
        let entity = EntityRef::new(EntityType::Campaign, "c1");
        assert!(resolve_one(&entity, &[]).is_none());

        // Evidence for a different entity is not usable either.
        let other = vec![record("c2", "Other", "2025-06-01")];
        assert!(resolve_one(&entity, &other).is_none());
    }

    #[test]
    fn test_resolve_all_groups_by_entity() {
        let records = vec![
            record("c1", "Alpha", "2025-06-01"),
            record("c2", "Beta", "2025-06-01"),
            record("c1", "Alpha", "2025-06-02"),
            record("c2", "Gamma", "2025-06-03"),
            record("c2", "Gamma", "2025-06-04"),
        ];
        let resolved = resolve_all(&records);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].entity.entity_id, "c1");
        assert_eq!(resolved[0].name, "Alpha");
        assert_eq!(resolved[1].entity.entity_id, "c2");
        assert_eq!(resolved[1].name, "Gamma");
    }

    #[test]
    fn test_full_tie_is_deterministic() {
        // Same count, same date: election still settles on one name.
        let entity = EntityRef::new(EntityType::Campaign, "c1");
        let records = vec![
            record("c1", "AAA", "2025-06-01"),
            record("c1", "BBB", "2025-06-01"),
        ];
        let a = resolve_one(&entity, &records).unwrap();
        let b = resolve_one(&entity, &records).unwrap();
        assert_eq!(a.name, b.name);
    }
}
