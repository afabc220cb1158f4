//! Immutable field and relation lookup table for the record kinds.
//!
//! Built once at startup from the per-kind field declarations and shared
//! (behind an `Arc`) with the store, the resolver and the path matcher.

use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

use crate::error::{GraphError, Result};
use crate::model::EntityKind;

/// Scalar value categories a field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Text,
    Int,
    Float,
    Bool,
    Date,
    /// Seconds past service-day midnight, written `H:MM:SS`.
    Time,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Text => "text",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
            ScalarKind::Date => "date",
            ScalarKind::Time => "time",
        }
    }
}

/// How a reference field ties the referencing record to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Target owns the referencing record; removal cascades.
    Ownership,
    /// Ownership where the dependent is a part of its owner and is retained
    /// whenever the owner is.
    Component,
    /// Lookup only.
    Reference,
    /// Advisory operational grouping, followed only when blocks are retained.
    Block,
}

impl EdgeKind {
    pub fn is_ownership(&self) -> bool {
        matches!(self, EdgeKind::Ownership | EdgeKind::Component)
    }
}

/// Declaration of a cross-reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefDef {
    pub target: EntityKind,
    /// Name of the reverse relation on the target (e.g. `trips` on a route).
    pub relation: &'static str,
    pub edge: EdgeKind,
    /// Whether retaining the referencing record also retains the target when
    /// reference edges are followed.
    pub retains_target: bool,
}

impl RefDef {
    pub const fn owned_by(target: EntityKind, relation: &'static str) -> Self {
        Self {
            target,
            relation,
            edge: EdgeKind::Ownership,
            retains_target: true,
        }
    }

    pub const fn component_of(target: EntityKind, relation: &'static str) -> Self {
        Self {
            target,
            relation,
            edge: EdgeKind::Component,
            retains_target: true,
        }
    }

    pub const fn retaining(target: EntityKind, relation: &'static str) -> Self {
        Self {
            target,
            relation,
            edge: EdgeKind::Reference,
            retains_target: true,
        }
    }

    pub const fn lookup(target: EntityKind, relation: &'static str) -> Self {
        Self {
            target,
            relation,
            edge: EdgeKind::Reference,
            retains_target: false,
        }
    }

    pub const fn block(target: EntityKind, relation: &'static str) -> Self {
        Self {
            target,
            relation,
            edge: EdgeKind::Block,
            retains_target: false,
        }
    }
}

/// Declared type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Ref(RefDef),
}

impl FieldKind {
    pub const TEXT: FieldKind = FieldKind::Scalar(ScalarKind::Text);
    pub const INT: FieldKind = FieldKind::Scalar(ScalarKind::Int);
    pub const FLOAT: FieldKind = FieldKind::Scalar(ScalarKind::Float);
    pub const BOOL: FieldKind = FieldKind::Scalar(ScalarKind::Bool);
    pub const DATE: FieldKind = FieldKind::Scalar(ScalarKind::Date);
    pub const TIME: FieldKind = FieldKind::Scalar(ScalarKind::Time);

    pub fn name(&self) -> String {
        match self {
            FieldKind::Scalar(scalar) => scalar.name().to_string(),
            FieldKind::Ref(def) => format!("ref<{}>", def.target),
        }
    }

    pub fn as_ref_def(&self) -> Option<&RefDef> {
        match self {
            FieldKind::Ref(def) => Some(def),
            FieldKind::Scalar(_) => None,
        }
    }
}

/// One field of a record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    /// Column name in the flat feed files.
    pub column: &'static str,
    pub kind: FieldKind,
}

/// A directed edge `owner -> dependent`, materialised from a reference field
/// on the dependent kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub owner: EntityKind,
    pub dependent: EntityKind,
    /// Field on the dependent that points at the owner.
    pub field: &'static str,
    pub edge: EdgeKind,
    pub retains_owner: bool,
}

/// A path step that stands for a longer path on a given kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAlias {
    pub kind: EntityKind,
    pub name: &'static str,
    pub expansion: &'static [&'static str],
}

const TRANSIT_ALIASES: &[PathAlias] = &[
    PathAlias {
        kind: EntityKind::StopTime,
        name: "route",
        expansion: &["trip", "route"],
    },
    PathAlias {
        kind: EntityKind::Frequency,
        name: "route",
        expansion: &["trip", "route"],
    },
];

#[derive(Debug, Clone)]
struct KindSchema {
    fields: &'static [FieldDef],
    owned: Vec<usize>,
    dependent: Vec<usize>,
}

/// Lookup table over every declared kind, field, relation and path alias.
#[derive(Debug, Clone)]
pub struct Schema {
    kinds: IndexMap<EntityKind, KindSchema>,
    relations: Vec<Relation>,
    aliases: Vec<PathAlias>,
    removal_order: Vec<EntityKind>,
}

impl Schema {
    /// The schedule-data schema over every record kind.
    pub fn transit() -> Result<Self> {
        Self::build(EntityKind::ALL, TRANSIT_ALIASES)
    }

    /// Build a schema restricted to `kinds`. Reference fields pointing at kinds
    /// outside the set are rejected.
    pub fn build(kinds: &[EntityKind], aliases: &[PathAlias]) -> Result<Self> {
        let mut table: IndexMap<EntityKind, KindSchema> = kinds
            .iter()
            .map(|kind| {
                (
                    *kind,
                    KindSchema {
                        fields: kind.fields(),
                        owned: Vec::new(),
                        dependent: Vec::new(),
                    },
                )
            })
            .collect();

        let mut relations = Vec::new();
        for kind in kinds {
            for field in kind.fields() {
                let FieldKind::Ref(def) = field.kind else {
                    continue;
                };
                if !table.contains_key(&def.target) {
                    return Err(GraphError::Config(format!(
                        "{}.{} references undeclared kind {}",
                        kind, field.name, def.target
                    )));
                }
                let duplicate = relations
                    .iter()
                    .any(|r: &Relation| r.owner == def.target && r.name == def.relation);
                if duplicate {
                    return Err(GraphError::Config(format!(
                        "relation '{}' declared twice on {}",
                        def.relation, def.target
                    )));
                }
                relations.push(Relation {
                    name: def.relation,
                    owner: def.target,
                    dependent: *kind,
                    field: field.name,
                    edge: def.edge,
                    retains_owner: def.retains_target,
                });
            }
        }

        for (idx, relation) in relations.iter().enumerate() {
            if let Some(owner) = table.get_mut(&relation.owner) {
                owner.owned.push(idx);
            }
            if let Some(dependent) = table.get_mut(&relation.dependent) {
                dependent.dependent.push(idx);
            }
        }

        let removal_order = compute_removal_order(kinds, &relations)?;
        let aliases = aliases
            .iter()
            .filter(|alias| table.contains_key(&alias.kind))
            .cloned()
            .collect();

        Ok(Self {
            kinds: table,
            relations,
            aliases,
            removal_order,
        })
    }

    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.kinds.keys().copied()
    }

    pub fn has_kind(&self, kind: EntityKind) -> bool {
        self.kinds.contains_key(&kind)
    }

    pub fn fields(&self, kind: EntityKind) -> &'static [FieldDef] {
        self.kinds.get(&kind).map(|k| k.fields).unwrap_or(&[])
    }

    pub fn field(&self, kind: EntityKind, name: &str) -> Option<&'static FieldDef> {
        self.fields(kind).iter().find(|f| f.name == name)
    }

    pub fn field_by_column(&self, kind: EntityKind, column: &str) -> Option<&'static FieldDef> {
        self.fields(kind).iter().find(|f| f.column == column)
    }

    /// Reference fields of `kind` with their declarations.
    pub fn ref_fields(
        &self,
        kind: EntityKind,
    ) -> impl Iterator<Item = (&'static FieldDef, &'static RefDef)> + '_ {
        self.fields(kind).iter().filter_map(|f| match &f.kind {
            FieldKind::Ref(def) => Some((f, def)),
            FieldKind::Scalar(_) => None,
        })
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation_at(&self, idx: usize) -> Option<&Relation> {
        self.relations.get(idx)
    }

    /// Relation named `name` whose owner is `owner`.
    pub fn relation(&self, owner: EntityKind, name: &str) -> Option<(usize, &Relation)> {
        self.owned_relations(owner).find(|(_, r)| r.name == name)
    }

    /// Relations where `kind` is the owning side.
    pub fn owned_relations(&self, kind: EntityKind) -> impl Iterator<Item = (usize, &Relation)> + '_ {
        self.kinds
            .get(&kind)
            .map(|k| k.owned.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |idx| (*idx, &self.relations[*idx]))
    }

    /// Relations where `kind` is the dependent (referencing) side.
    pub fn dependent_relations(
        &self,
        kind: EntityKind,
    ) -> impl Iterator<Item = (usize, &Relation)> + '_ {
        self.kinds
            .get(&kind)
            .map(|k| k.dependent.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |idx| (*idx, &self.relations[*idx]))
    }

    pub fn alias(&self, kind: EntityKind, name: &str) -> Option<&PathAlias> {
        self.aliases.iter().find(|a| a.kind == kind && a.name == name)
    }

    /// Kinds ordered so that ownership dependents come before their owners.
    pub fn removal_order(&self) -> &[EntityKind] {
        &self.removal_order
    }
}

/// Order kinds children-first over the ownership edges (Kahn's algorithm on
/// the owner -> dependent graph, then reversed).
///
/// Kinds are seeded in declaration order so the result is deterministic.
fn compute_removal_order(kinds: &[EntityKind], relations: &[Relation]) -> Result<Vec<EntityKind>> {
    let mut in_degree: HashMap<EntityKind, usize> = kinds.iter().map(|k| (*k, 0)).collect();
    let mut graph: HashMap<EntityKind, Vec<EntityKind>> = HashMap::new();

    for relation in relations.iter().filter(|r| r.edge.is_ownership()) {
        if relation.owner == relation.dependent {
            return Err(GraphError::Config(format!(
                "{} cannot own itself via '{}'",
                relation.owner, relation.name
            )));
        }
        let dependents = graph.entry(relation.owner).or_default();
        if !dependents.contains(&relation.dependent) {
            dependents.push(relation.dependent);
            *in_degree.entry(relation.dependent).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<EntityKind> = kinds
        .iter()
        .filter(|k| in_degree.get(*k) == Some(&0))
        .copied()
        .collect();
    let mut sorted = Vec::with_capacity(kinds.len());

    while let Some(kind) = queue.pop_front() {
        sorted.push(kind);
        for dependent in graph.get(&kind).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if sorted.len() != kinds.len() {
        let cyclic: Vec<_> = kinds.iter().filter(|k| !sorted.contains(k)).collect();
        return Err(GraphError::Config(format!(
            "ownership cycle detected involving kinds: {:?}",
            cyclic
        )));
    }

    sorted.reverse();
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[EntityKind], kind: EntityKind) -> usize {
        order.iter().position(|k| *k == kind).unwrap()
    }

    #[test]
    fn test_transit_schema_builds() {
        let schema = Schema::transit().unwrap();
        assert_eq!(schema.kinds().count(), EntityKind::ALL.len());
        assert!(schema.field(EntityKind::Trip, "route").is_some());
        assert!(schema.field(EntityKind::Trip, "nope").is_none());
    }

    #[test]
    fn test_relations_derived_from_reference_fields() {
        let schema = Schema::transit().unwrap();

        let (_, trips) = schema.relation(EntityKind::Route, "trips").unwrap();
        assert_eq!(trips.dependent, EntityKind::Trip);
        assert_eq!(trips.field, "route");
        assert_eq!(trips.edge, EdgeKind::Ownership);

        let (_, stop_times) = schema.relation(EntityKind::Trip, "stop_times").unwrap();
        assert_eq!(stop_times.edge, EdgeKind::Component);

        let (_, at_stop) = schema.relation(EntityKind::Stop, "stop_times").unwrap();
        assert_eq!(at_stop.edge, EdgeKind::Reference);

        // Two reference fields sharing a target kind yield two relations.
        assert!(schema.relation(EntityKind::Stop, "pathways_from").is_some());
        assert!(schema.relation(EntityKind::Stop, "pathways_to").is_some());
    }

    #[test]
    fn test_removal_order_is_children_first() {
        let schema = Schema::transit().unwrap();
        let order = schema.removal_order();

        assert_eq!(order.len(), EntityKind::ALL.len());
        assert!(position(order, EntityKind::StopTime) < position(order, EntityKind::Trip));
        assert!(position(order, EntityKind::Trip) < position(order, EntityKind::Route));
        assert!(position(order, EntityKind::Route) < position(order, EntityKind::Agency));
        assert!(position(order, EntityKind::FareRule) < position(order, EntityKind::FareAttribute));
        assert!(position(order, EntityKind::ShapePoint) < position(order, EntityKind::Shape));
    }

    #[test]
    fn test_schema_rejects_reference_to_missing_kind() {
        let result = Schema::build(&[EntityKind::Trip], &[]);
        assert!(matches!(result, Err(GraphError::Config(_))));
    }

    #[test]
    fn test_alias_lookup() {
        let schema = Schema::transit().unwrap();
        let alias = schema.alias(EntityKind::StopTime, "route").unwrap();
        assert_eq!(alias.expansion, &["trip", "route"]);
        assert!(schema.alias(EntityKind::Trip, "route").is_none());
    }
}
