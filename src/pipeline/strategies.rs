//! Generic strategies configurable from a pipeline file.

use indexmap::IndexMap;

use crate::error::{GraphError, Result};
use crate::matcher::{PathMatcher, TypedEntityMatch};
use crate::pipeline::config::StrategyConfig;
use crate::pipeline::{Strategy, StrategyReport, TransformContext};
use crate::record::RecordKey;
use crate::resolver::{DeferredQueue, RawValue, ResolveMode, ValueResolver};
use crate::retention::RetentionGraph;
use crate::store::EntityStore;

/// Removes every matched record together with everything it owns.
#[derive(Debug, Clone)]
pub struct RemoveMatching {
    name: String,
    selection: TypedEntityMatch,
}

impl RemoveMatching {
    pub fn new(name: impl Into<String>, selection: TypedEntityMatch) -> Self {
        Self {
            name: name.into(),
            selection,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        Ok(Self::new(config.label(), config.require_match()?))
    }
}

impl Strategy for RemoveMatching {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, context: &mut TransformContext, store: &mut EntityStore) -> Result<StrategyReport> {
        let matcher = PathMatcher::for_store(store);
        let ids = self.selection.select(&matcher, store);
        let graph = RetentionGraph::for_store(store, *context.retention());

        let mut report = StrategyReport::new();
        report.add("matched", ids.len());
        for id in &ids {
            let removed = graph.remove_cascading(store, self.selection.kind, id)?;
            report.add("removed", removed);
        }
        Ok(report)
    }
}

/// Keeps the matched records and everything they keep alive; sweeps the rest.
#[derive(Debug, Clone)]
pub struct RetainMatching {
    name: String,
    selection: TypedEntityMatch,
    follow_ownership_only: bool,
}

impl RetainMatching {
    pub fn new(name: impl Into<String>, selection: TypedEntityMatch, follow_ownership_only: bool) -> Self {
        Self {
            name: name.into(),
            selection,
            follow_ownership_only,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        Ok(Self::new(
            config.label(),
            config.require_match()?,
            config.follow_ownership_only,
        ))
    }
}

impl Strategy for RetainMatching {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, context: &mut TransformContext, store: &mut EntityStore) -> Result<StrategyReport> {
        let matcher = PathMatcher::for_store(store);
        let mut graph = RetentionGraph::for_store(store, *context.retention());
        graph.retain_matching(store, &matcher, &self.selection, self.follow_ownership_only);
        let sweep = graph.sweep(store);

        let mut report = StrategyReport::new();
        report.add("retained", graph.marked().len());
        report.add("removed", sweep.removed);
        if sweep.failures > 0 {
            report.add("sweep_failures", sweep.failures);
        }
        Ok(report)
    }
}

/// Assigns configured values to fields of every matched record. Values go
/// through the resolver, so references must name existing records.
#[derive(Debug, Clone)]
pub struct UpdateMatching {
    name: String,
    selection: TypedEntityMatch,
    set: IndexMap<String, RawValue>,
}

impl UpdateMatching {
    pub fn new(name: impl Into<String>, selection: TypedEntityMatch, set: IndexMap<String, RawValue>) -> Result<Self> {
        let kind = selection.kind;
        for field in set.keys() {
            if !kind.fields().iter().any(|f| f.name == field.as_str()) {
                return Err(GraphError::UnknownField {
                    kind,
                    field: field.clone(),
                });
            }
        }
        Ok(Self {
            name: name.into(),
            selection,
            set,
        })
    }

    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        if config.set.is_empty() {
            return Err(GraphError::Config(format!(
                "strategy '{}' needs a 'set' section",
                config.label()
            )));
        }
        Self::new(config.label(), config.require_match()?, config.set.clone())
    }
}

impl Strategy for UpdateMatching {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _context: &mut TransformContext, store: &mut EntityStore) -> Result<StrategyReport> {
        let matcher = PathMatcher::for_store(store);
        let resolver = ValueResolver::for_store(store);
        let ids = self.selection.select(&matcher, store);
        let mut queue = DeferredQueue::new();

        for id in &ids {
            let key = RecordKey::new(self.selection.kind, id.clone());
            for (field, raw) in &self.set {
                resolver.assign(store, &key, field, raw, ResolveMode::Eager, &mut queue)?;
            }
        }

        let mut report = StrategyReport::new();
        report.add("updated", ids.len());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{EntityRef, ScopedId};
    use crate::matcher::Predicate;
    use crate::model::{EntityKind, Route, Stop, StopTime, Trip};
    use crate::retention::RetentionConfig;
    use crate::store::StoreConfig;

    fn sid(id: &str) -> ScopedId {
        ScopedId::new("A1", id)
    }

    fn sample_store() -> EntityStore {
        let mut store = EntityStore::transit(StoreConfig::default()).unwrap();
        for (route, short_name) in [("R1", "10"), ("R2", "N1")] {
            let mut r = Route::new(sid(route));
            r.short_name = Some(short_name.to_string());
            store.save(r);
        }
        store.save(Stop::new(sid("S1")));
        for (trip, route) in [("T1", "R1"), ("T2", "R2")] {
            let mut t = Trip::new(sid(trip));
            t.route = Some(EntityRef::Resolved(sid(route)));
            store.save(t);
            let mut st = StopTime::new(sid(trip));
            st.trip = Some(EntityRef::Resolved(sid(trip)));
            st.stop = Some(EntityRef::Resolved(sid("S1")));
            store.save(st);
        }
        store
    }

    #[test]
    fn test_remove_matching_cascades() {
        let mut store = sample_store();
        let selection = TypedEntityMatch::new(EntityKind::Route)
            .with("short_name", Predicate::equals("N1"))
            .unwrap();
        let strategy = RemoveMatching::new("drop-night", selection);

        let report = strategy.run(&mut TransformContext::empty(), &mut store).unwrap();

        assert_eq!(report.count("matched"), 1);
        assert_eq!(report.count("removed"), 3);
        assert!(!store.contains(EntityKind::Trip, &sid("T2")));
        assert!(store.contains(EntityKind::Trip, &sid("T1")));
    }

    #[test]
    fn test_retain_matching_sweeps_everything_else() {
        let mut store = sample_store();
        let selection = TypedEntityMatch::new(EntityKind::Trip)
            .with("route.short_name", Predicate::equals("10"))
            .unwrap();
        let strategy = RetainMatching::new("keep-10", selection, false);
        let mut context = TransformContext::empty().with_retention(RetentionConfig::default());

        let report = strategy.run(&mut context, &mut store).unwrap();

        assert_eq!(report.count("removed"), 3);
        assert!(store.contains(EntityKind::Route, &sid("R1")));
        assert!(store.contains(EntityKind::Stop, &sid("S1")));
        assert!(!store.contains(EntityKind::Route, &sid("R2")));
    }

    #[test]
    fn test_update_matching_coerces_values() {
        let mut store = sample_store();
        let mut set = IndexMap::new();
        set.insert("route_type".to_string(), RawValue::from("3"));
        set.insert("color".to_string(), RawValue::from("FF0000"));
        let strategy = UpdateMatching::new("recolor", TypedEntityMatch::new(EntityKind::Route), set).unwrap();

        let report = strategy.run(&mut TransformContext::empty(), &mut store).unwrap();

        assert_eq!(report.count("updated"), 2);
        let route = store.get::<Route>(&sid("R2")).unwrap();
        assert_eq!(route.route_type, 3);
        assert_eq!(route.color.as_deref(), Some("FF0000"));
    }

    #[test]
    fn test_update_matching_fails_on_bad_value() {
        let mut store = sample_store();
        let mut set = IndexMap::new();
        set.insert("route_type".to_string(), RawValue::from("1.5"));
        let strategy = UpdateMatching::new("bad", TypedEntityMatch::new(EntityKind::Route), set).unwrap();

        let result = strategy.run(&mut TransformContext::empty(), &mut store);
        assert!(matches!(result, Err(GraphError::Coercion { .. })));
    }

    #[test]
    fn test_update_matching_rejects_unknown_field() {
        let mut set = IndexMap::new();
        set.insert("colour".to_string(), RawValue::from("red"));
        let result = UpdateMatching::new("typo", TypedEntityMatch::new(EntityKind::Route), set);
        assert!(matches!(result, Err(GraphError::UnknownField { .. })));
    }
}
