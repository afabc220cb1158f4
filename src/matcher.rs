//! Path evaluation and predicate matching over records.
//!
//! Evaluation is read-only: unresolved references are looked up through the
//! store but never written back.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::entity::FieldValue;
use crate::error::{GraphError, Result};
use crate::identity::{EntityRef, ScopedId};
use crate::model::EntityKind;
use crate::path::PropertyPath;
use crate::record::Record;
use crate::resolver::scoped_identity;
use crate::schema::{FieldKind, RefDef, Schema};
use crate::store::EntityStore;

/// A literal a path result is compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Literal {
    /// Compare against a single path result. Numbers compare numerically,
    /// identities and references by local or qualified id.
    pub fn matches(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (_, FieldValue::List(items)) => items.iter().any(|item| self.matches(item)),
            (Literal::Null, v) => v.is_null(),
            (_, FieldValue::Null) => false,
            (Literal::Bool(b), FieldValue::Bool(v)) => b == v,
            (Literal::Int(i), FieldValue::Int(v)) => i == v,
            (Literal::Int(i), FieldValue::Float(v)) => (*i as f64) == *v,
            (Literal::Float(f), FieldValue::Int(v)) => *f == (*v as f64),
            (Literal::Float(f), FieldValue::Float(v)) => f == v,
            (Literal::Text(t), FieldValue::String(v)) => t == v,
            (Literal::Text(t), FieldValue::Id(id)) => id.matches_text(t),
            (Literal::Text(t), FieldValue::Ref(r)) => r.matches_text(t),
            (Literal::Text(t), FieldValue::Int(v)) => t.trim().parse::<i64>().map(|p| p == *v).unwrap_or(false),
            (Literal::Text(t), FieldValue::Float(v)) => t.trim().parse::<f64>().map(|p| p == *v).unwrap_or(false),
            (Literal::Text(t), FieldValue::Bool(v)) => t.trim().parse::<bool>().map(|p| p == *v).unwrap_or(false),
            (Literal::Text(t), FieldValue::Date(d)) => {
                value.match_text() == *t || d.format("%Y-%m-%d").to_string() == *t
            }
            (Literal::Int(_) | Literal::Float(_) | Literal::Bool(_), other) => {
                other.match_text() == self.to_text()
            }
        }
    }

    fn to_text(&self) -> String {
        match self {
            Literal::Null => String::new(),
            Literal::Bool(b) => b.to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Text(t) => t.clone(),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Text(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

/// Terminal comparison applied to every value a path evaluates to.
#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(Literal),
    In(Vec<Literal>),
    Matches(Regex),
    /// True when the path is absent or every value is null.
    IsNull,
    NotNull,
}

impl Predicate {
    pub fn equals(literal: impl Into<Literal>) -> Self {
        Predicate::Equals(literal.into())
    }

    pub fn in_set<I, L>(literals: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Literal>,
    {
        Predicate::In(literals.into_iter().map(Into::into).collect())
    }

    pub fn matches(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Predicate::Matches)
            .map_err(|e| GraphError::InvalidPath {
                path: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// Existential test: succeeds if any value satisfies the comparison.
    pub fn test(&self, values: &[FieldValue]) -> bool {
        match self {
            Predicate::Equals(literal) => values.iter().any(|v| literal.matches(v)),
            Predicate::In(set) => values
                .iter()
                .any(|v| set.iter().any(|literal| literal.matches(v))),
            Predicate::Matches(re) => values
                .iter()
                .filter(|v| !v.is_null())
                .any(|v| re.is_match(&v.match_text())),
            Predicate::IsNull => values.iter().all(FieldValue::is_null),
            Predicate::NotNull => values.iter().any(|v| !v.is_null()),
        }
    }
}

/// A path paired with the predicate its values must satisfy.
#[derive(Debug, Clone)]
pub struct PathPredicate {
    pub path: PropertyPath,
    pub predicate: Predicate,
}

impl PathPredicate {
    pub fn new(path: &str, predicate: Predicate) -> Result<Self> {
        Ok(Self {
            path: PropertyPath::parse(path)?,
            predicate,
        })
    }

    /// Check every step of the path against `schema`, starting at `kind`.
    ///
    /// # Errors
    /// Returns `InvalidPath` naming the first step that is not an alias,
    /// `id`, field or relation of the kind reached so far, or that follows
    /// a terminal step
    pub fn validate(&self, schema: &Schema, kind: EntityKind) -> Result<()> {
        let invalid = |reason: String| GraphError::InvalidPath {
            path: self.path.raw.clone(),
            reason,
        };
        let mut steps: Vec<String> = self.path.steps.clone();
        let mut current = kind;
        let mut i = 0;

        while i < steps.len() {
            let step = steps[i].clone();
            let last = i + 1 == steps.len();

            if let Some(alias) = schema.alias(current, &step) {
                steps.splice(i..=i, alias.expansion.iter().map(|s| s.to_string()));
                continue;
            }

            if step == "id" {
                if !last {
                    return Err(invalid(format!("'id' of {} has no further steps", current)));
                }
            } else if let Some(field) = schema.field(current, &step) {
                match &field.kind {
                    FieldKind::Ref(def) => current = def.target,
                    FieldKind::Scalar(_) if !last => {
                        return Err(invalid(format!("{}.{} is a scalar field", current, step)));
                    }
                    FieldKind::Scalar(_) => {}
                }
            } else if let Some((_, relation)) = schema.relation(current, &step) {
                current = relation.dependent;
            } else {
                return Err(invalid(format!("{} has no field or relation '{}'", current, step)));
            }
            i += 1;
        }
        Ok(())
    }
}

/// Kind filter followed by path predicates combined with logical AND.
#[derive(Debug, Clone)]
pub struct TypedEntityMatch {
    pub kind: EntityKind,
    pub predicates: Vec<PathPredicate>,
}

impl TypedEntityMatch {
    /// Match every record of `kind`.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            predicates: Vec::new(),
        }
    }

    pub fn with(mut self, path: &str, predicate: Predicate) -> Result<Self> {
        self.predicates.push(PathPredicate::new(path, predicate)?);
        Ok(self)
    }

    /// Check every predicate path against `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        self.predicates
            .iter()
            .try_for_each(|p| p.validate(schema, self.kind))
    }

    pub fn is_match(&self, matcher: &PathMatcher, store: &EntityStore, record: &Record) -> bool {
        record.kind() == self.kind
            && self
                .predicates
                .iter()
                .all(|p| p.predicate.test(&matcher.evaluate(store, record, &p.path)))
    }

    /// Identities of every matching record, in store order.
    pub fn select(&self, matcher: &PathMatcher, store: &EntityStore) -> Vec<ScopedId> {
        store
            .get_all(self.kind)
            .filter(|record| self.is_match(matcher, store, record))
            .map(|record| record.id().clone())
            .collect()
    }
}

/// Evaluates property paths against records.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    schema: Arc<Schema>,
}

impl PathMatcher {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn for_store(store: &EntityStore) -> Self {
        Self::new(Arc::clone(store.schema()))
    }

    /// Every non-null value `path` reaches from `root`. An empty result means
    /// the path is absent.
    pub fn evaluate(&self, store: &EntityStore, root: &Record, path: &PropertyPath) -> Vec<FieldValue> {
        let mut out = Vec::new();
        self.walk(store, root, &path.steps, &mut out);
        out
    }

    /// Parse and evaluate in one step.
    pub fn evaluate_str(&self, store: &EntityStore, root: &Record, path: &str) -> Result<Vec<FieldValue>> {
        Ok(self.evaluate(store, root, &PropertyPath::parse(path)?))
    }

    fn walk(&self, store: &EntityStore, record: &Record, steps: &[String], out: &mut Vec<FieldValue>) {
        let Some((step, rest)) = steps.split_first() else {
            return;
        };
        let kind = record.kind();

        if let Some(alias) = self.schema.alias(kind, step) {
            let expanded: Vec<String> = alias
                .expansion
                .iter()
                .map(|s| s.to_string())
                .chain(rest.iter().cloned())
                .collect();
            return self.walk(store, record, &expanded, out);
        }

        if step == "id" {
            if rest.is_empty() {
                out.push(FieldValue::Id(record.id().clone()));
            }
            return;
        }

        if let Some(field) = self.schema.field(kind, step) {
            let Some(value) = record.get(step) else {
                return;
            };
            if value.is_null() {
                return;
            }
            match (&field.kind, rest.is_empty()) {
                (_, true) => match value {
                    FieldValue::List(items) => out.extend(items.into_iter().filter(|v| !v.is_null())),
                    other => out.push(other),
                },
                (FieldKind::Ref(def), false) => {
                    if let Some(target) = self.follow(store, def, record, &value) {
                        self.walk(store, target, rest, out);
                    }
                }
                // No further step exists below a scalar.
                (FieldKind::Scalar(_), false) => {}
            }
            return;
        }

        if let Some((idx, relation)) = self.schema.relation(kind, step) {
            for dependent_id in store.related_ids(idx, record.id()) {
                let Some(dependent) = store.get_by_id(relation.dependent, dependent_id) else {
                    continue;
                };
                if rest.is_empty() {
                    out.push(FieldValue::Id(dependent.id().clone()));
                } else {
                    self.walk(store, dependent, rest, out);
                }
            }
            return;
        }

        tracing::trace!("{} has no field or relation '{}'", kind, step);
    }

    fn follow<'s>(
        &self,
        store: &'s EntityStore,
        def: &RefDef,
        owner: &Record,
        value: &FieldValue,
    ) -> Option<&'s Record> {
        match value {
            FieldValue::Ref(EntityRef::Resolved(id)) | FieldValue::Id(id) => store.get_by_id(def.target, id),
            FieldValue::Ref(EntityRef::Unresolved(raw)) | FieldValue::String(raw) => {
                let id = scoped_identity(store, def.target, raw, &owner.id().scope);
                store.get_by_id(def.target, &id)
            }
            _ => None,
        }
    }
}
