//! Value coercion and reference resolution.
//!
//! Raw values are converted to a field's declared type through a fixed table
//! of rules keyed by `(raw kind, target kind)`. Reference fields turn textual
//! ids into identities checked against the store; forward references can be
//! queued and resolved in a second pass once every record is loaded.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::entity::FieldValue;
use crate::error::{GraphError, Result};
use crate::identity::{EntityRef, ScopedId};
use crate::model::{EntityKind, IdKind};
use crate::record::RecordKey;
use crate::schema::{FieldDef, FieldKind, ScalarKind, Schema};
use crate::store::EntityStore;

/// A value as read from a feed or a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// An identity that is already known, e.g. produced by a strategy.
    Ref(ScopedId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    Bool,
    Int,
    Float,
    Text,
}

impl RawValue {
    fn kind(&self) -> Option<RawKind> {
        match self {
            RawValue::Bool(_) => Some(RawKind::Bool),
            RawValue::Int(_) => Some(RawKind::Int),
            RawValue::Float(_) => Some(RawKind::Float),
            RawValue::Text(_) => Some(RawKind::Text),
            RawValue::Null | RawValue::Ref(_) => None,
        }
    }

    /// Null or blank text.
    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => write!(f, "null"),
            RawValue::Bool(b) => write!(f, "{}", b),
            RawValue::Int(i) => write!(f, "{}", i),
            RawValue::Float(fl) => write!(f, "{}", fl),
            RawValue::Text(s) => write!(f, "{}", s),
            RawValue::Ref(id) => write!(f, "{}", id),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<ScopedId> for RawValue {
    fn from(value: ScopedId) -> Self {
        RawValue::Ref(value)
    }
}

type Coerced = std::result::Result<FieldValue, String>;
type CoerceFn = fn(&RawValue) -> Coerced;

/// Every supported scalar conversion. Pairs not listed here are rejected.
const COERCIONS: &[(RawKind, ScalarKind, CoerceFn)] = &[
    (RawKind::Text, ScalarKind::Text, text_to_text),
    (RawKind::Text, ScalarKind::Int, text_to_int),
    (RawKind::Text, ScalarKind::Float, text_to_float),
    (RawKind::Text, ScalarKind::Bool, text_to_bool),
    (RawKind::Text, ScalarKind::Date, text_to_date),
    (RawKind::Text, ScalarKind::Time, text_to_time),
    (RawKind::Int, ScalarKind::Int, int_to_int),
    (RawKind::Int, ScalarKind::Float, int_to_float),
    (RawKind::Int, ScalarKind::Text, any_to_text),
    (RawKind::Int, ScalarKind::Bool, int_to_bool),
    (RawKind::Int, ScalarKind::Time, int_to_int),
    (RawKind::Float, ScalarKind::Float, float_to_float),
    (RawKind::Float, ScalarKind::Int, float_to_int),
    (RawKind::Float, ScalarKind::Text, any_to_text),
    (RawKind::Bool, ScalarKind::Bool, bool_to_bool),
    (RawKind::Bool, ScalarKind::Text, any_to_text),
    (RawKind::Bool, ScalarKind::Int, bool_to_int),
];

fn text_of(raw: &RawValue) -> std::result::Result<&str, String> {
    match raw {
        RawValue::Text(s) => Ok(s.trim()),
        other => Err(format!("expected text, got {}", other)),
    }
}

fn text_to_text(raw: &RawValue) -> Coerced {
    text_of(raw).map(|s| FieldValue::String(s.to_string()))
}

fn text_to_int(raw: &RawValue) -> Coerced {
    let text = text_of(raw)?;
    if let Ok(i) = text.parse::<i64>() {
        return Ok(FieldValue::Int(i));
    }
    match text.parse::<f64>() {
        Ok(f) => float_to_int(&RawValue::Float(f)),
        Err(_) => Err("not a number".to_string()),
    }
}

fn text_to_float(raw: &RawValue) -> Coerced {
    text_of(raw)?
        .parse::<f64>()
        .map(FieldValue::Float)
        .map_err(|_| "not a number".to_string())
}

fn text_to_bool(raw: &RawValue) -> Coerced {
    match text_of(raw)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(FieldValue::Bool(true)),
        "0" | "false" | "no" => Ok(FieldValue::Bool(false)),
        _ => Err("not a boolean".to_string()),
    }
}

fn text_to_date(raw: &RawValue) -> Coerced {
    let text = text_of(raw)?;
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .map(FieldValue::Date)
        .map_err(|e| format!("not a date: {}", e))
}

/// `H:MM:SS` past service-day midnight (hours may exceed 23), or plain seconds.
fn text_to_time(raw: &RawValue) -> Coerced {
    let text = text_of(raw)?;
    if let Ok(seconds) = text.parse::<i64>() {
        return Ok(FieldValue::Int(seconds));
    }
    let parts: Vec<&str> = text.split(':').collect();
    let [h, m, s] = parts.as_slice() else {
        return Err("expected H:MM:SS".to_string());
    };
    let parse = |part: &str| part.parse::<i64>().map_err(|_| "expected H:MM:SS".to_string());
    let (h, m, s) = (parse(*h)?, parse(*m)?, parse(*s)?);
    if h < 0 || !(0..60).contains(&m) || !(0..60).contains(&s) {
        return Err("time component out of range".to_string());
    }
    h.checked_mul(3600)
        .and_then(|secs| secs.checked_add(m * 60 + s))
        .map(FieldValue::Int)
        .ok_or_else(|| "time component out of range".to_string())
}

fn int_to_int(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Int(i) => Ok(FieldValue::Int(*i)),
        other => Err(format!("expected integer, got {}", other)),
    }
}

fn int_to_float(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Int(i) => Ok(FieldValue::Float(*i as f64)),
        other => Err(format!("expected integer, got {}", other)),
    }
}

fn int_to_bool(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Int(0) => Ok(FieldValue::Bool(false)),
        RawValue::Int(1) => Ok(FieldValue::Bool(true)),
        _ => Err("only 0 and 1 convert to a boolean".to_string()),
    }
}

fn float_to_float(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Float(f) => Ok(FieldValue::Float(*f)),
        other => Err(format!("expected number, got {}", other)),
    }
}

fn float_to_int(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Float(f) if !f.is_finite() => Err("not a finite number".to_string()),
        RawValue::Float(f) if f.fract() != 0.0 => Err("fractional value would be truncated".to_string()),
        RawValue::Float(f) if f.abs() >= i64::MAX as f64 => Err("value out of integer range".to_string()),
        RawValue::Float(f) => Ok(FieldValue::Int(*f as i64)),
        other => Err(format!("expected number, got {}", other)),
    }
}

fn bool_to_bool(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Bool(b) => Ok(FieldValue::Bool(*b)),
        other => Err(format!("expected boolean, got {}", other)),
    }
}

fn bool_to_int(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Bool(b) => Ok(FieldValue::Int(i64::from(*b))),
        other => Err(format!("expected boolean, got {}", other)),
    }
}

fn any_to_text(raw: &RawValue) -> Coerced {
    Ok(FieldValue::String(raw.to_string()))
}

/// Convert a raw value to a scalar field value.
///
/// # Arguments
///
/// * `raw` - The raw value; null and blank text yield `FieldValue::Null`
/// * `target` - Declared scalar kind of the field
/// * `field` - Field name, for error context
pub fn coerce_scalar(raw: &RawValue, target: ScalarKind, field: &str) -> Result<FieldValue> {
    if raw.is_blank() {
        return Ok(FieldValue::Null);
    }
    let rule = raw.kind().and_then(|kind| {
        COERCIONS
            .iter()
            .find(|(from, to, _)| *from == kind && *to == target)
            .map(|(_, _, rule)| *rule)
    });
    let outcome = match rule {
        Some(rule) => rule(raw),
        None => Err("no conversion rule".to_string()),
    };
    outcome.map_err(|reason| GraphError::Coercion {
        field: field.to_string(),
        raw: raw.to_string(),
        target: target.name().to_string(),
        reason,
    })
}

/// Build the identity a textual reference names.
///
/// The target kind's declared id kind decides whether a scope applies. For
/// scoped kinds, `raw` is first taken as a local id under `default_scope`;
/// failing that, a `scope_id` form whose prefix is a known scope is split.
pub fn scoped_identity(store: &EntityStore, target: EntityKind, raw: &str, default_scope: &str) -> ScopedId {
    let raw = raw.trim();
    if target.id_kind() == IdKind::Bare {
        return ScopedId::bare(raw);
    }
    let local = ScopedId::new(default_scope, raw);
    if store.contains(target, &local) {
        return local;
    }
    match ScopedId::split_qualified(raw) {
        Some((scope, id)) if store.has_scope(scope) => ScopedId::new(scope, id),
        _ => local,
    }
}

/// Whether a missing reference target is an error or a pending resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    #[default]
    Eager,
    Deferred,
}

/// A reference whose target was not in the store when it was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredReference {
    pub owner: RecordKey,
    pub field: String,
    pub target: EntityKind,
    pub raw: String,
    pub scope: String,
}

/// Outcome of resolving one raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Value(FieldValue),
    Deferred(DeferredReference),
}

/// Coerces raw values into declared field types and resolves references.
#[derive(Debug, Clone)]
pub struct ValueResolver {
    schema: Arc<Schema>,
}

impl ValueResolver {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn for_store(store: &EntityStore) -> Self {
        Self::new(Arc::clone(store.schema()))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Resolve `raw` for `field` of the record identified by `owner`.
    ///
    /// # Arguments
    ///
    /// * `default_scope` - Scope for unqualified ids; the owner's scope when `None`
    /// * `mode` - Eager raises `MissingEntity` for absent targets; deferred returns a token
    ///
    /// # Returns
    ///
    /// The converted value, a deferred token, or a coercion/missing-entity error
    pub fn resolve(
        &self,
        store: &EntityStore,
        raw: &RawValue,
        field: &FieldDef,
        owner: &RecordKey,
        default_scope: Option<&str>,
        mode: ResolveMode,
    ) -> Result<Resolution> {
        let def = match &field.kind {
            FieldKind::Scalar(scalar) => {
                return coerce_scalar(raw, *scalar, field.name).map(Resolution::Value);
            }
            FieldKind::Ref(def) => def,
        };

        let text = match raw {
            RawValue::Ref(id) => {
                return Ok(Resolution::Value(FieldValue::Ref(EntityRef::Resolved(id.clone()))));
            }
            raw if raw.is_blank() => return Ok(Resolution::Value(FieldValue::Null)),
            RawValue::Text(s) => s.trim().to_string(),
            RawValue::Int(i) => i.to_string(),
            other => {
                return Err(GraphError::Coercion {
                    field: field.name.to_string(),
                    raw: other.to_string(),
                    target: field.kind.name(),
                    reason: "references are written as ids".to_string(),
                });
            }
        };

        let scope = default_scope.unwrap_or(&owner.id.scope);
        let id = scoped_identity(store, def.target, &text, scope);
        if store.contains(def.target, &id) {
            return Ok(Resolution::Value(FieldValue::Ref(EntityRef::Resolved(id))));
        }

        match mode {
            ResolveMode::Eager => Err(GraphError::MissingEntity {
                kind: def.target,
                id: id.to_string(),
                field: field.name.to_string(),
            }),
            ResolveMode::Deferred => {
                tracing::debug!("{} field '{}' defers {} '{}'", owner, field.name, def.target, text);
                Ok(Resolution::Deferred(DeferredReference {
                    owner: owner.clone(),
                    field: field.name.to_string(),
                    target: def.target,
                    raw: text,
                    scope: scope.to_string(),
                }))
            }
        }
    }

    /// Resolve `raw` and assign it to a field of a stored record. Deferred
    /// references are stored unresolved and pushed onto `queue`.
    pub fn assign(
        &self,
        store: &mut EntityStore,
        key: &RecordKey,
        field: &str,
        raw: &RawValue,
        mode: ResolveMode,
        queue: &mut DeferredQueue,
    ) -> Result<()> {
        let def = self
            .schema
            .field(key.kind, field)
            .ok_or_else(|| GraphError::UnknownField {
                kind: key.kind,
                field: field.to_string(),
            })?;
        if store.get_key(key).is_none() {
            return Err(GraphError::NotFound {
                kind: key.kind,
                id: key.id.to_string(),
            });
        }

        match self.resolve(store, raw, def, key, None, mode)? {
            Resolution::Value(value) => store.set_field(key.kind, &key.id, field, value),
            Resolution::Deferred(token) => {
                let pending = FieldValue::Ref(EntityRef::Unresolved(token.raw.clone()));
                store.set_field(key.kind, &key.id, field, pending)?;
                queue.push(token);
                Ok(())
            }
        }
    }
}

/// Outcome of the second resolution pass.
#[derive(Debug, Default)]
pub struct DeferredReport {
    pub resolved: usize,
    /// Tokens dropped because their record or field changed since queueing.
    pub stale: usize,
    pub unresolved: Vec<GraphError>,
}

/// Pending forward references, drained once the full load has completed.
#[derive(Debug, Clone, Default)]
pub struct DeferredQueue {
    pending: Vec<DeferredReference>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: DeferredReference) {
        self.pending.push(token);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeferredReference> {
        self.pending.iter()
    }

    /// Re-resolve every pending token against the store, leaving the queue
    /// empty. References that still have no target are reported per field.
    pub fn drain(&mut self, store: &mut EntityStore) -> Result<DeferredReport> {
        let mut report = DeferredReport::default();

        for token in std::mem::take(&mut self.pending) {
            let current = store.get_key(&token.owner).and_then(|r| r.get(&token.field));
            let still_pending = matches!(
                &current,
                Some(FieldValue::Ref(EntityRef::Unresolved(raw))) if *raw == token.raw
            );
            if !still_pending {
                tracing::debug!("dropping stale deferred reference on {} field '{}'", token.owner, token.field);
                report.stale += 1;
                continue;
            }

            let id = scoped_identity(store, token.target, &token.raw, &token.scope);
            if store.contains(token.target, &id) {
                let value = FieldValue::Ref(EntityRef::Resolved(id));
                store.set_field(token.owner.kind, &token.owner.id, &token.field, value)?;
                report.resolved += 1;
            } else {
                tracing::warn!(
                    "{} field '{}' still references unknown {} '{}'",
                    token.owner,
                    token.field,
                    token.target,
                    token.raw
                );
                report.unresolved.push(GraphError::UnresolvedDeferredReference {
                    kind: token.owner.kind,
                    id: token.owner.id.to_string(),
                    field: token.field,
                    target: token.target,
                    raw: token.raw,
                });
            }
        }

        Ok(report)
    }
}
