//! Identity-keyed record store with relation indices.
//!
//! Each kind has its own collection keyed by `ScopedId`. Every relation in the
//! schema has a reverse index `owner id -> dependent ids`, maintained on every
//! mutation from the dependent's resolved reference field.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::entity::{Entity, FieldValue};
use crate::error::{GraphError, Result};
use crate::identity::{EntityRef, ScopedId};
use crate::model::EntityKind;
use crate::record::{Record, RecordKey};
use crate::schema::Schema;

/// What happens to references pointing at a record that is removed while
/// records referencing it remain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingPolicy {
    /// Keep the textual id, drop the live link.
    #[default]
    Unresolve,
    /// Unset the field.
    Clear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Refuse removals that would orphan an ownership dependent.
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub dangling: DanglingPolicy,
}

type RelationIndex = HashMap<ScopedId, IndexSet<ScopedId>>;

/// Typed collections of records keyed by identity.
#[derive(Debug, Clone)]
pub struct EntityStore {
    schema: Arc<Schema>,
    config: StoreConfig,
    collections: HashMap<EntityKind, IndexMap<ScopedId, Record>>,
    /// One index per schema relation, addressed by relation position.
    indices: Vec<RelationIndex>,
    scopes: HashSet<String>,
}

impl EntityStore {
    pub fn new(schema: Arc<Schema>, config: StoreConfig) -> Self {
        let indices = vec![RelationIndex::new(); schema.relations().len()];
        Self {
            schema,
            config,
            collections: HashMap::new(),
            indices,
            scopes: HashSet::new(),
        }
    }

    /// Store over the schedule-data schema.
    pub fn transit(config: StoreConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(Schema::transit()?), config))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: StoreConfig) {
        self.config = config;
    }

    pub fn get_by_id(&self, kind: EntityKind, id: &ScopedId) -> Option<&Record> {
        self.collections.get(&kind).and_then(|c| c.get(id))
    }

    pub fn get_key(&self, key: &RecordKey) -> Option<&Record> {
        self.get_by_id(key.kind, &key.id)
    }

    /// Typed lookup.
    pub fn get<T: Entity>(&self, id: &ScopedId) -> Option<&T> {
        self.get_by_id(T::KIND, id).and_then(T::from_record)
    }

    pub fn contains(&self, kind: EntityKind, id: &ScopedId) -> bool {
        self.collections
            .get(&kind)
            .map(|c| c.contains_key(id))
            .unwrap_or(false)
    }

    /// All records of `kind`. Order is stable until the next removal.
    pub fn get_all(&self, kind: EntityKind) -> impl Iterator<Item = &Record> + '_ {
        self.collections
            .get(&kind)
            .into_iter()
            .flat_map(|c| c.values())
    }

    pub fn all<T: Entity>(&self) -> impl Iterator<Item = &T> + '_ {
        self.get_all(T::KIND).filter_map(T::from_record)
    }

    /// Snapshot of the identities of `kind`, for callers that mutate while iterating.
    pub fn ids(&self, kind: EntityKind) -> Vec<ScopedId> {
        self.collections
            .get(&kind)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.collections.get(&kind).map(|c| c.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scopes seen on saved records, plus every agency id.
    pub fn scopes(&self) -> &HashSet<String> {
        &self.scopes
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Records related to `owner` through the relation named `relation`.
    pub fn get_related(&self, owner: EntityKind, owner_id: &ScopedId, relation: &str) -> Vec<&Record> {
        match self.schema.relation(owner, relation) {
            Some((idx, rel)) => self
                .related_ids(idx, owner_id)
                .filter_map(|id| self.get_by_id(rel.dependent, id))
                .collect(),
            None => {
                tracing::debug!("{} has no relation named '{}'", owner, relation);
                Vec::new()
            }
        }
    }

    /// Dependent identities for relation position `relation_idx`.
    pub fn related_ids(&self, relation_idx: usize, owner_id: &ScopedId) -> impl Iterator<Item = &ScopedId> + '_ {
        self.indices
            .get(relation_idx)
            .and_then(|index| index.get(owner_id))
            .into_iter()
            .flat_map(|ids| ids.iter())
    }

    /// Insert or replace a record by identity, updating every relation index
    /// it participates in. Returns the replaced record, if any.
    pub fn save(&mut self, record: impl Into<Record>) -> Option<Record> {
        let mut record = record.into();
        self.demote_missing_references(&mut record);

        let kind = record.kind();
        let id = record.id().clone();
        if !id.scope.is_empty() {
            self.scopes.insert(id.scope.clone());
        }
        if kind == EntityKind::Agency {
            self.scopes.insert(id.id.clone());
        }

        let collection = self.collections.entry(kind).or_default();
        let previous = collection.insert(id.clone(), record);
        if let Some(prev) = &previous {
            unindex_record(&self.schema, &mut self.indices, prev);
        }
        if let Some(current) = collection.get(&id) {
            index_record(&self.schema, &mut self.indices, current);
        }

        tracing::trace!("saved {} '{}'", kind, id);
        previous
    }

    /// Apply `mutate` to a record in place and re-index it. A changed identity
    /// re-keys the record and re-points resolved references held by its dependents.
    pub fn update<F>(&mut self, kind: EntityKind, id: &ScopedId, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Record) -> Result<()>,
    {
        let mut record = self
            .get_by_id(kind, id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound {
                kind,
                id: id.to_string(),
            })?;
        mutate(&mut record)?;

        if record.id() == id {
            self.save(record);
            return Ok(());
        }
        self.rekey(kind, id, record)
    }

    /// Typed variant of [`EntityStore::update`].
    pub fn update_as<T, F>(&mut self, id: &ScopedId, mutate: F) -> Result<()>
    where
        T: Entity,
        F: FnOnce(&mut T),
    {
        self.update(T::KIND, id, |record| {
            if let Some(entity) = T::from_record_mut(record) {
                mutate(entity);
            }
            Ok(())
        })
    }

    pub fn set_field(&mut self, kind: EntityKind, id: &ScopedId, field: &str, value: FieldValue) -> Result<()> {
        if field != "id" && self.schema.field(kind, field).is_none() {
            return Err(GraphError::UnknownField {
                kind,
                field: field.to_string(),
            });
        }
        self.update(kind, id, |record| record.set(field, value))
    }

    /// Remove a record from its collection and from every index.
    ///
    /// Does not cascade. In strict mode, fails if an ownership dependent
    /// still references the record; otherwise the remaining references are
    /// handled according to the dangling policy.
    pub fn remove(&mut self, kind: EntityKind, id: &ScopedId) -> Result<Option<Record>> {
        if !self.contains(kind, id) {
            return Ok(None);
        }

        let mut dependents: Vec<(usize, Vec<ScopedId>)> = Vec::new();
        for (idx, relation) in self.schema.owned_relations(kind) {
            let ids: Vec<ScopedId> = self.related_ids(idx, id).cloned().collect();
            if ids.is_empty() {
                continue;
            }
            if relation.edge.is_ownership() {
                if self.config.strict {
                    return Err(GraphError::DanglingReference {
                        kind,
                        id: id.to_string(),
                        dependent_kind: relation.dependent,
                        dependent_id: ids[0].to_string(),
                        relation: relation.name.to_string(),
                    });
                }
                tracing::warn!(
                    "removing {} '{}' leaves {} {} record(s) without their owner",
                    kind,
                    id,
                    ids.len(),
                    relation.dependent
                );
            }
            dependents.push((idx, ids));
        }

        let replacement = match self.config.dangling {
            DanglingPolicy::Unresolve => FieldValue::Ref(EntityRef::Unresolved(id.to_string())),
            DanglingPolicy::Clear => FieldValue::Null,
        };
        for (idx, ids) in dependents {
            let Some(relation) = self.schema.relation_at(idx) else {
                continue;
            };
            let (dependent_kind, field) = (relation.dependent, relation.field);
            for dependent_id in ids {
                let dependent = self
                    .collections
                    .get_mut(&dependent_kind)
                    .and_then(|c| c.get_mut(&dependent_id));
                if let Some(dependent) = dependent {
                    if let Err(err) = dependent.set(field, replacement.clone()) {
                        tracing::warn!("could not detach {} '{}': {}", dependent_kind, dependent_id, err);
                    }
                }
            }
            if let Some(index) = self.indices.get_mut(idx) {
                index.remove(id);
            }
        }

        let removed = self
            .collections
            .get_mut(&kind)
            .and_then(|c| c.swap_remove(id));
        if let Some(record) = &removed {
            unindex_record(&self.schema, &mut self.indices, record);
            tracing::debug!("removed {} '{}'", kind, id);
        }
        Ok(removed)
    }

    /// Rebuild every relation index from scratch.
    pub fn reindex(&mut self) {
        for index in &mut self.indices {
            index.clear();
        }
        for collection in self.collections.values() {
            for record in collection.values() {
                index_record(&self.schema, &mut self.indices, record);
            }
        }
    }

    /// Kinds with at least one record.
    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<EntityKind> = self
            .collections
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(k, _)| *k)
            .collect();
        kinds.sort();
        kinds
    }

    fn rekey(&mut self, kind: EntityKind, old_id: &ScopedId, record: Record) -> Result<()> {
        let new_id = record.id().clone();
        if self.contains(kind, &new_id) {
            return Err(GraphError::Config(format!(
                "cannot re-key {} '{}' to '{}': identity already taken",
                kind, old_id, new_id
            )));
        }

        let mut moved: Vec<(EntityKind, ScopedId, &'static str)> = Vec::new();
        for (idx, relation) in self.schema.owned_relations(kind) {
            for dependent_id in self.related_ids(idx, old_id) {
                moved.push((relation.dependent, dependent_id.clone(), relation.field));
            }
        }

        if let Some(old) = self.collections.get_mut(&kind).and_then(|c| c.swap_remove(old_id)) {
            unindex_record(&self.schema, &mut self.indices, &old);
        }
        self.save(record);

        for (dependent_kind, dependent_id, field) in moved {
            let value = FieldValue::Ref(EntityRef::Resolved(new_id.clone()));
            self.update(dependent_kind, &dependent_id, |dependent| dependent.set(field, value))?;
        }
        tracing::debug!("re-keyed {} '{}' to '{}'", kind, old_id, new_id);
        Ok(())
    }

    /// Resolved references must point at records in the store; anything else
    /// falls back to its textual id.
    fn demote_missing_references(&self, record: &mut Record) {
        let kind = record.kind();
        let own_id = record.id().clone();
        let mut demoted = Vec::new();
        for (field, def) in self.schema.ref_fields(kind) {
            if let Some(FieldValue::Ref(EntityRef::Resolved(target))) = record.get(field.name) {
                let self_reference = def.target == kind && target == own_id;
                if !self_reference && !self.contains(def.target, &target) {
                    demoted.push((field.name, target));
                }
            }
        }
        for (field, target) in demoted {
            tracing::debug!(
                "{} '{}' field '{}' points at missing '{}'; keeping it unresolved",
                kind,
                own_id,
                field,
                target
            );
            let value = FieldValue::Ref(EntityRef::Unresolved(target.to_string()));
            if let Err(err) = record.set(field, value) {
                tracing::warn!("{}", err);
            }
        }
    }
}

fn index_record(schema: &Schema, indices: &mut [RelationIndex], record: &Record) {
    for (idx, relation) in schema.dependent_relations(record.kind()) {
        if let Some(FieldValue::Ref(EntityRef::Resolved(owner))) = record.get(relation.field) {
            indices[idx]
                .entry(owner)
                .or_default()
                .insert(record.id().clone());
        }
    }
}

fn unindex_record(schema: &Schema, indices: &mut [RelationIndex], record: &Record) {
    for (idx, relation) in schema.dependent_relations(record.kind()) {
        if let Some(FieldValue::Ref(EntityRef::Resolved(owner))) = record.get(relation.field) {
            let index = &mut indices[idx];
            let emptied = match index.get_mut(&owner) {
                Some(ids) => {
                    ids.swap_remove(record.id());
                    ids.is_empty()
                }
                None => false,
            };
            if emptied {
                index.remove(&owner);
            }
        }
    }
}
