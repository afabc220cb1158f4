//! Mark-and-sweep retention over the ownership graph, plus direct cascading
//! removal.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::entity::FieldValue;
use crate::error::Result;
use crate::identity::{EntityRef, ScopedId};
use crate::matcher::{PathMatcher, TypedEntityMatch};
use crate::model::EntityKind;
use crate::record::RecordKey;
use crate::schema::{EdgeKind, Schema};
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Follow trip/block grouping edges while marking.
    #[serde(default)]
    pub retain_blocks: bool,
}

/// Direction a record was reached in. Ownership edges are only walked from
/// records reached downward (roots and their owned records), so retention
/// never flows from a dependent to its owner's other dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Reach {
    Down,
    Up,
}

/// Result of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    /// Removals refused by the store (strict mode), counted and skipped.
    pub failures: usize,
    pub removed_by_kind: IndexMap<EntityKind, usize>,
}

/// Marked set for one retention computation.
#[derive(Debug, Clone)]
pub struct RetentionGraph {
    schema: Arc<Schema>,
    config: RetentionConfig,
    marked: HashSet<RecordKey>,
    visited: HashSet<(RecordKey, Reach, bool)>,
}

impl RetentionGraph {
    pub fn new(schema: Arc<Schema>, config: RetentionConfig) -> Self {
        Self {
            schema,
            config,
            marked: HashSet::new(),
            visited: HashSet::new(),
        }
    }

    pub fn for_store(store: &EntityStore, config: RetentionConfig) -> Self {
        Self::new(Arc::clone(store.schema()), config)
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    pub fn marked(&self) -> &HashSet<RecordKey> {
        &self.marked
    }

    pub fn is_retained(&self, kind: EntityKind, id: &ScopedId) -> bool {
        self.marked.contains(&RecordKey::new(kind, id.clone()))
    }

    /// Forget every mark.
    pub fn clear(&mut self) {
        self.marked.clear();
        self.visited.clear();
    }

    /// Mark a root and everything it keeps alive.
    ///
    /// # Arguments
    ///
    /// * `follow_ownership_only` - When false, retaining reference edges
    ///   (e.g. a stop keeping its parent station) are followed as well
    ///
    /// # Returns
    ///
    /// Number of records newly marked. Roots absent from the store mark nothing.
    pub fn retain(&mut self, store: &EntityStore, kind: EntityKind, id: &ScopedId, follow_ownership_only: bool) -> usize {
        if !store.contains(kind, id) {
            tracing::debug!("ignoring retain of absent {} '{}'", kind, id);
            return 0;
        }

        let before = self.marked.len();
        let mut stack = vec![(RecordKey::new(kind, id.clone()), Reach::Down)];

        while let Some((key, reach)) = stack.pop() {
            if !self.visited.insert((key.clone(), reach, follow_ownership_only)) {
                continue;
            }
            let Some(record) = store.get_key(&key) else {
                continue;
            };
            self.marked.insert(key.clone());

            for (idx, relation) in self.schema.owned_relations(key.kind) {
                let next = match relation.edge {
                    EdgeKind::Component => Some(reach),
                    EdgeKind::Ownership if reach == Reach::Down => Some(Reach::Down),
                    EdgeKind::Block if self.config.retain_blocks => Some(Reach::Down),
                    _ => None,
                };
                let Some(next) = next else {
                    continue;
                };
                for dependent in store.related_ids(idx, &key.id) {
                    stack.push((RecordKey::new(relation.dependent, dependent.clone()), next));
                }
            }

            for (field, def) in self.schema.ref_fields(key.kind) {
                let follow = match def.edge {
                    EdgeKind::Block => self.config.retain_blocks,
                    _ => !follow_ownership_only && def.retains_target,
                };
                if !follow {
                    continue;
                }
                if let Some(FieldValue::Ref(EntityRef::Resolved(target))) = record.get(field.name) {
                    stack.push((RecordKey::new(def.target, target), Reach::Up));
                }
            }
        }

        let added = self.marked.len() - before;
        tracing::debug!("retaining {} '{}' marked {} record(s)", kind, id, added);
        added
    }

    /// Retain every record selected by `selection`.
    pub fn retain_matching(
        &mut self,
        store: &EntityStore,
        matcher: &PathMatcher,
        selection: &TypedEntityMatch,
        follow_ownership_only: bool,
    ) -> usize {
        selection
            .select(matcher, store)
            .iter()
            .map(|id| self.retain(store, selection.kind, id, follow_ownership_only))
            .sum()
    }

    /// Remove every unmarked record, dependents before owners. Never fails;
    /// refused removals are counted.
    pub fn sweep(&self, store: &mut EntityStore) -> SweepReport {
        let mut report = SweepReport::default();

        for kind in self.schema.removal_order() {
            for id in store.ids(*kind) {
                if self.is_retained(*kind, &id) {
                    continue;
                }
                match store.remove(*kind, &id) {
                    Ok(Some(_)) => {
                        report.removed += 1;
                        *report.removed_by_kind.entry(*kind).or_insert(0) += 1;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!("sweep kept {} '{}': {}", kind, id, err);
                        report.failures += 1;
                    }
                }
            }
        }

        tracing::info!(
            "sweep removed {} record(s), {} failure(s)",
            report.removed,
            report.failures
        );
        report
    }

    /// Remove a record together with everything it owns, children first.
    ///
    /// # Returns
    ///
    /// Number of records removed; zero if the record is absent
    pub fn remove_cascading(&self, store: &mut EntityStore, kind: EntityKind, id: &ScopedId) -> Result<usize> {
        if !store.contains(kind, id) {
            return Ok(0);
        }

        let mut order: Vec<RecordKey> = Vec::new();
        let mut seen: HashSet<RecordKey> = HashSet::new();
        let mut stack = vec![(RecordKey::new(kind, id.clone()), false)];

        while let Some((key, expanded)) = stack.pop() {
            if expanded {
                order.push(key);
                continue;
            }
            if !seen.insert(key.clone()) {
                continue;
            }
            stack.push((key.clone(), true));
            for (idx, relation) in self.schema.owned_relations(key.kind) {
                if !relation.edge.is_ownership() {
                    continue;
                }
                for dependent in store.related_ids(idx, &key.id) {
                    let dependent = RecordKey::new(relation.dependent, dependent.clone());
                    if !seen.contains(&dependent) {
                        stack.push((dependent, false));
                    }
                }
            }
        }

        let mut removed = 0;
        for key in &order {
            if store.remove(key.kind, &key.id)?.is_some() {
                removed += 1;
            }
        }
        tracing::debug!("cascading removal of {} '{}' removed {} record(s)", kind, id, removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Block, Route, Stop, StopTime, Trip};
    use crate::store::StoreConfig;

    fn sid(id: &str) -> ScopedId {
        ScopedId::new("A1", id)
    }

    fn resolved(id: &str) -> Option<EntityRef> {
        Some(EntityRef::Resolved(sid(id)))
    }

    /// R -> {T1, T2}, T1 -> {S1}, T2 -> {S2}; stop times visit stop P.
    fn sample_store(config: StoreConfig) -> EntityStore {
        let mut store = EntityStore::transit(config).unwrap();
        store.save(Route::new(sid("R")));
        store.save(Stop::new(sid("P")));
        for (trip, stop_time) in [("T1", "S1"), ("T2", "S2")] {
            let mut t = Trip::new(sid(trip));
            t.route = resolved("R");
            store.save(t);
            let mut st = StopTime::new(sid(stop_time));
            st.trip = resolved(trip);
            st.stop = resolved("P");
            store.save(st);
        }
        store
    }

    fn surviving(store: &EntityStore) -> Vec<String> {
        let mut ids: Vec<String> = EntityKind::ALL
            .iter()
            .flat_map(|kind| store.ids(*kind))
            .map(|id| id.id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_sweep_keeps_owned_subtree_of_root() {
        let mut store = sample_store(StoreConfig::default());
        let mut graph = RetentionGraph::for_store(&store, RetentionConfig::default());

        graph.retain(&store, EntityKind::Trip, &sid("T2"), true);
        let report = graph.sweep(&mut store);

        assert_eq!(surviving(&store), vec!["S2", "T2"]);
        assert_eq!(report.removed, 4);
        assert_eq!(report.failures, 0);
    }

    #[test]
    fn test_retain_follows_retaining_references() {
        let mut store = sample_store(StoreConfig::default());
        let mut graph = RetentionGraph::for_store(&store, RetentionConfig::default());

        graph.retain(&store, EntityKind::Trip, &sid("T2"), false);
        graph.sweep(&mut store);

        // The route is kept, but not its other trip.
        assert_eq!(surviving(&store), vec!["P", "R", "S2", "T2"]);
    }

    #[test]
    fn test_retain_is_idempotent() {
        let store = sample_store(StoreConfig::default());
        let mut graph = RetentionGraph::for_store(&store, RetentionConfig::default());

        let first = graph.retain(&store, EntityKind::Route, &sid("R"), true);
        let marked = graph.marked().clone();
        let second = graph.retain(&store, EntityKind::Route, &sid("R"), true);

        assert_eq!(first, 5);
        assert_eq!(second, 0);
        assert_eq!(graph.marked(), &marked);
    }

    #[test]
    fn test_retain_absent_record_is_noop() {
        let store = sample_store(StoreConfig::default());
        let mut graph = RetentionGraph::for_store(&store, RetentionConfig::default());
        assert_eq!(graph.retain(&store, EntityKind::Trip, &sid("T9"), false), 0);
        assert!(graph.marked().is_empty());
    }

    #[test]
    fn test_strict_sweep_counts_failures_instead_of_raising() {
        let config = StoreConfig {
            strict: true,
            ..StoreConfig::default()
        };
        let mut store = sample_store(config);
        let mut graph = RetentionGraph::for_store(&store, RetentionConfig::default());

        graph.retain(&store, EntityKind::Trip, &sid("T2"), true);
        let report = graph.sweep(&mut store);

        // The route still owns T2 and cannot be removed in strict mode.
        assert_eq!(report.failures, 1);
        assert!(store.contains(EntityKind::Route, &sid("R")));
        assert!(!store.contains(EntityKind::Trip, &sid("T1")));
    }

    #[test]
    fn test_blocks_followed_only_when_enabled() {
        let mut store = sample_store(StoreConfig::default());
        store.save(Block::new(sid("B1")));
        for trip in ["T1", "T2"] {
            store
                .update_as::<Trip, _>(&sid(trip), |t| t.block = resolved("B1"))
                .unwrap();
        }

        let mut plain = RetentionGraph::for_store(&store, RetentionConfig::default());
        plain.retain(&store, EntityKind::Trip, &sid("T1"), true);
        assert!(!plain.is_retained(EntityKind::Trip, &sid("T2")));
        assert!(!plain.is_retained(EntityKind::Block, &sid("B1")));

        let mut blocks = RetentionGraph::for_store(&store, RetentionConfig { retain_blocks: true });
        blocks.retain(&store, EntityKind::Trip, &sid("T1"), true);
        assert!(blocks.is_retained(EntityKind::Block, &sid("B1")));
        assert!(blocks.is_retained(EntityKind::Trip, &sid("T2")));
        assert!(blocks.is_retained(EntityKind::StopTime, &sid("S2")));
    }

    #[test]
    fn test_remove_cascading_removes_owned_subtree() {
        let config = StoreConfig {
            strict: true,
            ..StoreConfig::default()
        };
        let mut store = sample_store(config);
        let graph = RetentionGraph::for_store(&store, RetentionConfig::default());

        let removed = graph.remove_cascading(&mut store, EntityKind::Route, &sid("R")).unwrap();

        assert_eq!(removed, 5);
        assert_eq!(surviving(&store), vec!["P"]);
        assert!(store.get_related(EntityKind::Stop, &sid("P"), "stop_times").is_empty());
    }

    #[test]
    fn test_remove_cascading_absent_record() {
        let mut store = sample_store(StoreConfig::default());
        let graph = RetentionGraph::for_store(&store, RetentionConfig::default());
        assert_eq!(graph.remove_cascading(&mut store, EntityKind::Trip, &sid("T9")).unwrap(), 0);
    }
}
