//! Feed loading: raw table rows into store records.
//!
//! Rows are loaded table by table with references resolved in deferred mode,
//! so a row may name a record from a table that has not been read yet.
//! [`FeedLoader::finish`] runs the second pass once every table is in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::entity::FieldValue;
use crate::error::{GraphError, Result};
use crate::identity::{EntityRef, ScopedId};
use crate::model::{EntityKind, IdKind};
use crate::record::{Record, RecordKey};
use crate::resolver::{
    scoped_identity, DeferredQueue, DeferredReference, RawValue, Resolution, ResolveMode, ValueResolver,
};
use crate::schema::{FieldDef, FieldKind};
use crate::store::EntityStore;

/// One input row, keyed by feed column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    /// 1-based position within its table.
    pub line: usize,
    pub columns: IndexMap<String, RawValue>,
}

impl RawRow {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            columns: IndexMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: impl Into<RawValue>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    fn text(&self, column: &str) -> Option<String> {
        self.columns
            .get(column)
            .filter(|v| !v.is_blank())
            .map(|v| v.to_string().trim().to_string())
    }
}

/// Counts and recoverable conditions gathered over one load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: IndexMap<EntityKind, usize>,
    /// Block and shape records created because a row referred to them.
    pub implicit: usize,
    pub malformed: Vec<GraphError>,
    pub resolved: usize,
    pub stale: usize,
    pub unresolved: Vec<GraphError>,
}

impl LoadReport {
    pub fn total_loaded(&self) -> usize {
        self.loaded.values().sum()
    }

    pub fn loaded_of(&self, kind: EntityKind) -> usize {
        self.loaded.get(&kind).copied().unwrap_or(0)
    }

    /// Rows and references that were skipped rather than raised.
    pub fn recoverable(&self) -> usize {
        self.malformed.len() + self.unresolved.len()
    }
}

/// Loads rows of one feed into a store under a single scope.
#[derive(Debug)]
pub struct FeedLoader {
    resolver: ValueResolver,
    scope: String,
    queue: DeferredQueue,
    sequences: HashMap<EntityKind, usize>,
    default_agency: Option<ScopedId>,
    report: LoadReport,
}

impl FeedLoader {
    pub fn new(store: &EntityStore, scope: impl Into<String>) -> Self {
        Self {
            resolver: ValueResolver::for_store(store),
            scope: scope.into(),
            queue: DeferredQueue::new(),
            sequences: HashMap::new(),
            default_agency: None,
            report: LoadReport::default(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// References still waiting for their target.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Load every row of one table.
    ///
    /// Malformed rows (a missing id, a duplicate id, a value that cannot be
    /// coerced) are skipped and counted. Returns the number of rows stored.
    pub fn load_table(&mut self, store: &mut EntityStore, kind: EntityKind, rows: &[RawRow]) -> Result<usize> {
        if kind.is_implicit() {
            return Err(GraphError::Config(format!("{} records are not loaded from a table", kind)));
        }

        let mut stored = 0;
        for row in rows {
            match self.build_record(store, kind, row) {
                Ok((record, implicit, tokens)) => {
                    for (target, id) in implicit {
                        if !store.contains(target, &id) {
                            store.save(target.new_record(id));
                            self.report.implicit += 1;
                        }
                    }
                    if kind == EntityKind::Agency && self.default_agency.is_none() {
                        self.default_agency = Some(record.id().clone());
                    }
                    store.save(record);
                    for token in tokens {
                        self.queue.push(token);
                    }
                    stored += 1;
                }
                Err(err @ GraphError::MalformedInput { .. }) => {
                    tracing::warn!("skipping row: {}", err);
                    self.report.malformed.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        *self.report.loaded.entry(kind).or_insert(0) += stored;
        tracing::debug!(
            "loaded {} of {} {} row(s), {} reference(s) pending",
            stored,
            rows.len(),
            kind,
            self.queue.len()
        );
        Ok(stored)
    }

    /// Resolve queued forward references and hand back the load report.
    pub fn finish(mut self, store: &mut EntityStore) -> Result<LoadReport> {
        let drained = self.queue.drain(store)?;
        self.report.resolved = drained.resolved;
        self.report.stale = drained.stale;
        self.report.unresolved = drained.unresolved;

        tracing::info!(
            "loaded {} record(s) into scope '{}' ({} implicit, {} malformed row(s), {} unresolved reference(s))",
            self.report.total_loaded(),
            self.scope,
            self.report.implicit,
            self.report.malformed.len(),
            self.report.unresolved.len()
        );
        Ok(self.report)
    }

    fn malformed(kind: EntityKind, row: &RawRow, reason: impl Into<String>) -> GraphError {
        GraphError::MalformedInput {
            kind,
            line: row.line,
            reason: reason.into(),
        }
    }

    fn row_identity(&mut self, store: &EntityStore, kind: EntityKind, row: &RawRow) -> Result<ScopedId> {
        let id = match kind.id_column() {
            Some(column) => match (row.text(column), kind.id_kind()) {
                (Some(local), IdKind::Bare) => ScopedId::bare(local),
                (Some(local), IdKind::Scoped) => ScopedId::new(self.scope.as_str(), local),
                // single-operator feeds may omit agency_id
                (None, IdKind::Bare) => ScopedId::bare(self.scope.as_str()),
                (None, IdKind::Scoped) => {
                    return Err(Self::malformed(kind, row, format!("missing '{}'", column)));
                }
            },
            None => {
                let next = self.sequences.entry(kind).or_insert(0);
                *next += 1;
                ScopedId::new(self.scope.as_str(), next.to_string())
            }
        };

        if store.contains(kind, &id) {
            return Err(Self::malformed(kind, row, format!("duplicate id '{}'", id)));
        }
        Ok(id)
    }

    #[allow(clippy::type_complexity)]
    fn build_record(
        &mut self,
        store: &EntityStore,
        kind: EntityKind,
        row: &RawRow,
    ) -> Result<(Record, Vec<(EntityKind, ScopedId)>, Vec<DeferredReference>)> {
        let id = self.row_identity(store, kind, row)?;
        let key = RecordKey::new(kind, id.clone());
        let mut record = kind.new_record(id);
        let mut implicit = Vec::new();
        let mut tokens = Vec::new();

        for (column, raw) in &row.columns {
            if Some(column.as_str()) == kind.id_column() {
                continue;
            }
            let Some(field) = self.resolver.schema().field_by_column(kind, column) else {
                tracing::trace!("ignoring column '{}' on {}", column, kind);
                continue;
            };

            let value = match self.implicit_target(store, field, raw) {
                Some((target, target_id)) => {
                    implicit.push((target, target_id.clone()));
                    FieldValue::Ref(EntityRef::Resolved(target_id))
                }
                None => {
                    let resolution = self
                        .resolver
                        .resolve(store, raw, field, &key, Some(self.scope.as_str()), ResolveMode::Deferred)
                        .map_err(|err| Self::malformed(kind, row, err.to_string()))?;
                    match resolution {
                        Resolution::Value(value) => value,
                        Resolution::Deferred(token) => {
                            let pending = FieldValue::Ref(EntityRef::Unresolved(token.raw.clone()));
                            tokens.push(token);
                            pending
                        }
                    }
                }
            };
            record
                .set(field.name, value)
                .map_err(|err| Self::malformed(kind, row, err.to_string()))?;
        }

        self.apply_default_agency(&mut record);
        Ok((record, implicit, tokens))
    }

    /// Target identity for a non-blank reference to a kind that has no table.
    fn implicit_target(
        &self,
        store: &EntityStore,
        field: &FieldDef,
        raw: &RawValue,
    ) -> Option<(EntityKind, ScopedId)> {
        let FieldKind::Ref(def) = &field.kind else {
            return None;
        };
        if !def.target.is_implicit() || raw.is_blank() {
            return None;
        }
        let text = raw.to_string();
        Some((def.target, scoped_identity(store, def.target, &text, &self.scope)))
    }

    fn apply_default_agency(&self, record: &mut Record) {
        let Some(agency) = &self.default_agency else {
            return;
        };
        let refers_to_agency = record.fields().iter().any(|f| {
            f.name == "agency" && matches!(&f.kind, FieldKind::Ref(def) if def.target == EntityKind::Agency)
        });
        if refers_to_agency && record.get("agency").map_or(false, |v| v.is_null()) {
            let value = FieldValue::Ref(EntityRef::Resolved(agency.clone()));
            if let Err(err) = record.set("agency", value) {
                tracing::debug!("could not default agency on {}: {}", record.key(), err);
            }
        }
    }
}

/// A whole feed as one JSON document:
///
/// ```json
/// { "scope": "A1", "tables": { "routes": [ { "route_id": "R1", "route_type": 3 } ] } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedDocument {
    pub scope: String,
    #[serde(default)]
    pub tables: IndexMap<String, Vec<IndexMap<String, RawValue>>>,
}

impl FeedDocument {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| GraphError::Io(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(contents)?;
        if document.scope.trim().is_empty() {
            return Err(GraphError::Config("feed document needs a non-empty 'scope'".to_string()));
        }
        Ok(document)
    }

    /// Load every known table, agencies first, then finish the load.
    /// Unknown tables are skipped with a warning.
    pub fn load_into(&self, store: &mut EntityStore) -> Result<LoadReport> {
        let mut by_kind: HashMap<EntityKind, &Vec<IndexMap<String, RawValue>>> = HashMap::new();
        for (table, rows) in &self.tables {
            let name = table.trim_end_matches(".txt");
            match EntityKind::ALL.iter().find(|k| k.table() == Some(name)) {
                Some(kind) => {
                    by_kind.insert(*kind, rows);
                }
                None => tracing::warn!("skipping unknown table '{}'", table),
            }
        }

        let mut loader = FeedLoader::new(store, self.scope.as_str());
        for kind in EntityKind::EMISSION_ORDER {
            let Some(rows) = by_kind.get(kind) else {
                continue;
            };
            let rows: Vec<RawRow> = rows
                .iter()
                .enumerate()
                .map(|(idx, columns)| RawRow {
                    line: idx + 1,
                    columns: columns.clone(),
                })
                .collect();
            loader.load_table(store, *kind, &rows)?;
        }
        loader.finish(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Route, Stop, StopTime, Trip};
    use crate::store::StoreConfig;

    fn store() -> EntityStore {
        EntityStore::transit(StoreConfig::default()).unwrap()
    }

    fn sid(id: &str) -> ScopedId {
        ScopedId::new("A1", id)
    }

    #[test]
    fn test_forward_references_resolve_on_finish() {
        let mut store = store();
        let mut loader = FeedLoader::new(&store, "A1");

        let trips = vec![RawRow::new(1).with("trip_id", "T1").with("route_id", "R1")];
        loader.load_table(&mut store, EntityKind::Trip, &trips).unwrap();
        assert_eq!(loader.pending(), 1);
        assert_eq!(
            store.get::<Trip>(&sid("T1")).unwrap().route,
            Some(EntityRef::Unresolved("R1".to_string()))
        );

        let routes = vec![RawRow::new(1).with("route_id", "R1").with("route_type", "3")];
        loader.load_table(&mut store, EntityKind::Route, &routes).unwrap();

        let report = loader.finish(&mut store).unwrap();
        assert_eq!(report.resolved, 1);
        assert!(report.unresolved.is_empty());
        assert_eq!(
            store.get::<Trip>(&sid("T1")).unwrap().route,
            Some(EntityRef::Resolved(sid("R1")))
        );
        assert_eq!(store.get_related(EntityKind::Route, &sid("R1"), "trips").len(), 1);
    }

    #[test]
    fn test_malformed_rows_are_counted_and_skipped() {
        let mut store = store();
        let mut loader = FeedLoader::new(&store, "A1");
        let stops = vec![
            RawRow::new(1).with("stop_id", "S1").with("stop_lat", "52.1").with("stop_lon", "4.3"),
            RawRow::new(2).with("stop_id", "S2").with("stop_lat", "north"),
            RawRow::new(3).with("stop_name", "No id"),
            RawRow::new(4).with("stop_id", "S1"),
        ];

        let stored = loader.load_table(&mut store, EntityKind::Stop, &stops).unwrap();
        let report = loader.finish(&mut store).unwrap();

        assert_eq!(stored, 1);
        assert_eq!(report.malformed.len(), 3);
        assert!(report
            .malformed
            .iter()
            .all(|e| matches!(e, GraphError::MalformedInput { kind: EntityKind::Stop, .. })));
        assert_eq!(store.get::<Stop>(&sid("S1")).unwrap().lat, 52.1);
    }

    #[test]
    fn test_oversized_time_is_malformed_not_fatal() {
        let mut store = store();
        let mut loader = FeedLoader::new(&store, "A1");
        let stop_times = vec![
            RawRow::new(1)
                .with("stop_sequence", 1i64)
                .with("arrival_time", "9999999999999999:00:00"),
            RawRow::new(2).with("stop_sequence", 2i64).with("arrival_time", "08:00:00"),
        ];

        let stored = loader.load_table(&mut store, EntityKind::StopTime, &stop_times).unwrap();
        let report = loader.finish(&mut store).unwrap();

        assert_eq!(stored, 1);
        assert_eq!(report.malformed.len(), 1);
        assert!(matches!(
            report.malformed[0],
            GraphError::MalformedInput { kind: EntityKind::StopTime, .. }
        ));
    }

    #[test]
    fn test_sequential_ids_and_implicit_records() {
        let mut store = store();
        let mut loader = FeedLoader::new(&store, "A1");
        let trips = vec![
            RawRow::new(1).with("trip_id", "T1").with("block_id", "B1"),
            RawRow::new(2).with("trip_id", "T2").with("block_id", "B1"),
        ];
        loader.load_table(&mut store, EntityKind::Trip, &trips).unwrap();
        let stop_times = vec![
            RawRow::new(1).with("trip_id", "T1").with("stop_sequence", 1i64),
            RawRow::new(2).with("trip_id", "T1").with("stop_sequence", 2i64),
        ];
        loader.load_table(&mut store, EntityKind::StopTime, &stop_times).unwrap();
        let report = loader.finish(&mut store).unwrap();

        assert_eq!(report.implicit, 1);
        assert!(store.contains(EntityKind::Block, &sid("B1")));
        assert_eq!(store.get::<StopTime>(&sid("2")).unwrap().stop_sequence, 2);
        assert_eq!(store.get_related(EntityKind::Trip, &sid("T1"), "stop_times").len(), 2);
    }

    #[test]
    fn test_unresolved_references_are_reported() {
        let mut store = store();
        let mut loader = FeedLoader::new(&store, "A1");
        let trips = vec![RawRow::new(1).with("trip_id", "T1").with("route_id", "R9")];
        loader.load_table(&mut store, EntityKind::Trip, &trips).unwrap();

        let report = loader.finish(&mut store).unwrap();
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.recoverable(), 1);
        assert_eq!(
            store.get::<Trip>(&sid("T1")).unwrap().route,
            Some(EntityRef::Unresolved("R9".to_string()))
        );
    }

    #[test]
    fn test_routes_default_to_first_agency() {
        let mut store = store();
        let mut loader = FeedLoader::new(&store, "A1");
        loader
            .load_table(&mut store, EntityKind::Agency, &[RawRow::new(1).with("agency_name", "Metro")])
            .unwrap();
        loader
            .load_table(&mut store, EntityKind::Route, &[RawRow::new(1).with("route_id", "R1")])
            .unwrap();
        loader.finish(&mut store).unwrap();

        let route = store.get::<Route>(&sid("R1")).unwrap();
        assert_eq!(route.agency, Some(EntityRef::Resolved(ScopedId::bare("A1"))));
    }

    #[test]
    fn test_feed_document_loads_in_table_order() {
        let json = r#"{
            "scope": "A1",
            "tables": {
                "stop_times": [{ "trip_id": "T1", "stop_id": "S1", "stop_sequence": 1, "arrival_time": "08:00:00" }],
                "trips": [{ "trip_id": "T1", "route_id": "R1", "service_id": "WK" }],
                "routes": [{ "route_id": "R1", "agency_id": "A1", "route_type": 3 }],
                "stops": [{ "stop_id": "S1", "stop_lat": 52.0, "stop_lon": 4.0 }],
                "calendar": [{ "service_id": "WK", "monday": "1", "start_date": "20240101" }],
                "agency": [{ "agency_id": "A1", "agency_name": "Metro" }],
                "feed_info": [{ "feed_publisher_name": "x" }]
            }
        }"#;
        let document = FeedDocument::from_json_str(json).unwrap();
        let mut store = store();

        let report = document.load_into(&mut store).unwrap();

        assert_eq!(report.total_loaded(), 6);
        assert!(report.unresolved.is_empty());
        assert_eq!(report.resolved, 0);
        let stop_time = store.get::<StopTime>(&sid("1")).unwrap();
        assert_eq!(stop_time.arrival_time, Some(8 * 3600));
        assert_eq!(stop_time.stop, Some(EntityRef::Resolved(sid("S1"))));
    }

    #[test]
    fn test_feed_document_requires_scope() {
        let result = FeedDocument::from_json_str(r#"{ "scope": "", "tables": {} }"#);
        assert!(matches!(result, Err(GraphError::Config(_))));
    }
}
