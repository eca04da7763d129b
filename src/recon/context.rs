//! Per-Run Context
//!
//! Every recompute carries one `RunContext` through every call instead of any
//! process-wide cache or singleton, so concurrent runs over disjoint scopes
//! cannot interfere. The context holds the resolver snapshots taken at run
//! start and the date window; it is immutable for the life of the run.

use crate::recon::model::{CanonicalName, DateWindow, EntityRef, HierarchyEdge};
use std::collections::HashMap;
use uuid::Uuid;

/// Immutable state shared by every partition of one recompute run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub window: DateWindow,
    names: HashMap<EntityRef, CanonicalName>,
    hierarchy: HashMap<String, HierarchyEdge>,
}

impl RunContext {
    pub fn new(
        window: DateWindow,
        names: Vec<CanonicalName>,
        edges: Vec<HierarchyEdge>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            window,
            names: names.into_iter().map(|n| (n.entity.clone(), n)).collect(),
            hierarchy: edges.into_iter().map(|e| (e.ad_id.clone(), e)).collect(),
        }
    }

    /// Canonical display name snapshot for an entity, if elected.
    pub fn display_name(&self, entity: &EntityRef) -> Option<&str> {
        self.names.get(entity).map(|n| n.name.as_str())
    }

    /// Active parent edge snapshot for an ad, if resolved.
    pub fn parent_of(&self, ad_id: &str) -> Option<&HierarchyEdge> {
        self.hierarchy.get(ad_id)
    }

    pub fn ambiguous_edge_count(&self) -> u64 {
        self.hierarchy.values().filter(|e| e.ambiguous).count() as u64
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon::model::{Day, EntityType};

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    #[test]
    fn test_context_lookups() {
        let window = DateWindow::new(day("2025-07-01"), day("2025-07-05")).unwrap();
        let entity = EntityRef::new(EntityType::Campaign, "c1");
        let ctx = RunContext::new(
            window,
            vec![CanonicalName {
                entity: entity.clone(),
                name: "Summer Sale".to_string(),
                observations: 3,
                last_observed: day("2025-07-01"),
            }],
            vec![HierarchyEdge {
                ad_id: "ad1".to_string(),
                adset_id: "as1".to_string(),
                campaign_id: "c1".to_string(),
                confidence: 1.0,
                ambiguous: false,
                first_seen: day("2025-06-01"),
                last_seen: day("2025-07-01"),
            }],
        );

        assert_eq!(ctx.display_name(&entity), Some("Summer Sale"));
        assert!(ctx.display_name(&EntityRef::new(EntityType::Campaign, "c2")).is_none());
        assert_eq!(ctx.parent_of("ad1").unwrap().campaign_id, "c1");
        assert_eq!(ctx.ambiguous_edge_count(), 0);
    }

    #[test]
    fn test_distinct_runs_get_distinct_ids() {
        let window = DateWindow::new(day("2025-07-01"), day("2025-07-01")).unwrap();
        let a = RunContext::new(window, vec![], vec![]);
        let b = RunContext::new(window, vec![], vec![]);
        assert_ne!(a.run_id, b.run_id);
    }
}
