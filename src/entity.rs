//! Core entity trait and field values.
//!
//! Every record kind is a plain struct with typed fields. Named access to
//! those fields (needed by the path matcher and the value resolver) goes
//! through an explicit per-type accessor table generated by
//! [`transit_entity!`], never through runtime reflection.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

use crate::error::Result;
use crate::identity::{EntityRef, ScopedId};
use crate::model::EntityKind;
use crate::record::Record;
use crate::schema::FieldDef;

/// Represents the value held by a record field
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    /// A record's own identity.
    Id(ScopedId),
    Ref(EntityRef),
    List(Vec<FieldValue>),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Text used for pattern matching. Identities and resolved references
    /// match on their local id.
    pub fn match_text(&self) -> String {
        match self {
            FieldValue::Id(id) => id.id.clone(),
            FieldValue::Ref(EntityRef::Resolved(id)) => id.id.clone(),
            FieldValue::Ref(EntityRef::Unresolved(raw)) => raw.clone(),
            FieldValue::Date(date) => date.format("%Y%m%d").to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y%m%d")),
            FieldValue::Id(id) => write!(f, "{}", id),
            FieldValue::Ref(r) => write!(f, "{}", r),
            FieldValue::List(l) => write!(f, "{:?}", l),
            FieldValue::Null => write!(f, "null"),
        }
    }
}

/// Conversion between a typed struct field and a [`FieldValue`].
///
/// Values arriving here have already been coerced by the resolver; the only
/// conversions accepted are lossless ones.
pub trait FieldSlot: Sized {
    fn to_value(&self) -> FieldValue;
    fn from_value(value: &FieldValue) -> std::result::Result<Self, String>;
}

impl FieldSlot for String {
    fn to_value(&self) -> FieldValue {
        FieldValue::String(self.clone())
    }

    fn from_value(value: &FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::String(s) => Ok(s.clone()),
            FieldValue::Null => Ok(String::new()),
            FieldValue::Int(_) | FieldValue::Float(_) | FieldValue::Bool(_) => Ok(value.to_string()),
            other => Err(format!("expected text, got {}", other)),
        }
    }
}

impl FieldSlot for i64 {
    fn to_value(&self) -> FieldValue {
        FieldValue::Int(*self)
    }

    fn from_value(value: &FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::Int(i) => Ok(*i),
            FieldValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(*f as i64),
            other => Err(format!("expected integer, got {}", other)),
        }
    }
}

impl FieldSlot for f64 {
    fn to_value(&self) -> FieldValue {
        FieldValue::Float(*self)
    }

    fn from_value(value: &FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::Float(f) => Ok(*f),
            FieldValue::Int(i) => Ok(*i as f64),
            other => Err(format!("expected number, got {}", other)),
        }
    }
}

impl FieldSlot for bool {
    fn to_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }

    fn from_value(value: &FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::Bool(b) => Ok(*b),
            FieldValue::Null => Ok(false),
            other => Err(format!("expected boolean, got {}", other)),
        }
    }
}

impl FieldSlot for NaiveDate {
    fn to_value(&self) -> FieldValue {
        FieldValue::Date(*self)
    }

    fn from_value(value: &FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::Date(d) => Ok(*d),
            other => Err(format!("expected date, got {}", other)),
        }
    }
}

impl FieldSlot for EntityRef {
    fn to_value(&self) -> FieldValue {
        FieldValue::Ref(self.clone())
    }

    fn from_value(value: &FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::Ref(r) => Ok(r.clone()),
            FieldValue::Id(id) => Ok(EntityRef::Resolved(id.clone())),
            FieldValue::String(raw) => Ok(EntityRef::Unresolved(raw.clone())),
            other => Err(format!("expected reference, got {}", other)),
        }
    }
}

impl<T: FieldSlot> FieldSlot for Option<T> {
    fn to_value(&self) -> FieldValue {
        match self {
            Some(inner) => inner.to_value(),
            None => FieldValue::Null,
        }
    }

    fn from_value(value: &FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Core trait for all record kinds.
///
/// Equality and hashing of implementors are defined by identity only.
pub trait Entity: Clone + fmt::Debug + Serialize + Sized + 'static {
    /// The kind of this record type
    const KIND: EntityKind;

    /// Declared fields, excluding the identity
    const FIELDS: &'static [FieldDef];

    fn id(&self) -> &ScopedId;

    fn set_id(&mut self, id: ScopedId);

    /// Read a field by name. `"id"` yields the record's identity.
    fn get(&self, field: &str) -> Option<FieldValue>;

    /// Write a field by name.
    fn set(&mut self, field: &str, value: FieldValue) -> Result<()>;

    fn from_record(record: &Record) -> Option<&Self>;

    fn from_record_mut(record: &mut Record) -> Option<&mut Self>;

    fn into_record(self) -> Record;

    /// Convert the record to a dictionary representation
    fn to_dict(&self) -> IndexMap<String, FieldValue> {
        let mut dict = IndexMap::with_capacity(Self::FIELDS.len() + 1);
        dict.insert("id".to_string(), FieldValue::Id(self.id().clone()));
        for field in Self::FIELDS {
            if let Some(value) = self.get(field.name) {
                dict.insert(field.name.to_string(), value);
            }
        }
        dict
    }

    /// Convert the record to a JSON string
    fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Declare a record struct together with its field table and accessors.
///
/// ```ignore
/// transit_entity! {
///     /// A scheduled vehicle journey.
///     pub struct Trip {
///         route: Option<EntityRef> = "route_id" => FieldKind::Ref(RefDef::owned_by(EntityKind::Route, "trips")),
///         headsign: Option<String> = "trip_headsign" => FieldKind::TEXT,
///     }
/// }
/// ```
///
/// The struct name must match its `EntityKind` and `Record` variant.
macro_rules! transit_entity {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty = $column:literal => $kind:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            pub id: $crate::identity::ScopedId,
            $(
                $(#[$fmeta])*
                #[serde(default)]
                pub $field: $ty,
            )*
        }

        impl $name {
            pub fn new(id: $crate::identity::ScopedId) -> Self {
                Self {
                    id,
                    ..Default::default()
                }
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl From<$name> for $crate::record::Record {
            fn from(entity: $name) -> Self {
                $crate::record::Record::$name(entity)
            }
        }

        impl $crate::entity::Entity for $name {
            const KIND: $crate::model::EntityKind = $crate::model::EntityKind::$name;

            const FIELDS: &'static [$crate::schema::FieldDef] = &[
                $(
                    $crate::schema::FieldDef {
                        name: stringify!($field),
                        column: $column,
                        kind: $kind,
                    },
                )*
            ];

            fn id(&self) -> &$crate::identity::ScopedId {
                &self.id
            }

            fn set_id(&mut self, id: $crate::identity::ScopedId) {
                self.id = id;
            }

            #[allow(unused_variables)]
            fn get(&self, field: &str) -> Option<$crate::entity::FieldValue> {
                if field == "id" {
                    return Some($crate::entity::FieldValue::Id(self.id.clone()));
                }
                $(
                    if field == stringify!($field) {
                        return Some($crate::entity::FieldSlot::to_value(&self.$field));
                    }
                )*
                None
            }

            fn set(
                &mut self,
                field: &str,
                value: $crate::entity::FieldValue,
            ) -> $crate::error::Result<()> {
                if field == "id" {
                    return match value {
                        $crate::entity::FieldValue::Id(id) => {
                            self.id = id;
                            Ok(())
                        }
                        other => Err($crate::error::GraphError::Coercion {
                            field: field.to_string(),
                            raw: other.to_string(),
                            target: "identity".to_string(),
                            reason: "identities are replaced with an identity value".to_string(),
                        }),
                    };
                }
                $(
                    if field == stringify!($field) {
                        self.$field = $crate::entity::FieldSlot::from_value(&value).map_err(|reason| {
                            $crate::error::GraphError::Coercion {
                                field: field.to_string(),
                                raw: value.to_string(),
                                target: stringify!($ty).to_string(),
                                reason,
                            }
                        })?;
                        return Ok(());
                    }
                )*
                Err($crate::error::GraphError::UnknownField {
                    kind: $crate::model::EntityKind::$name,
                    field: field.to_string(),
                })
            }

            fn from_record(record: &$crate::record::Record) -> Option<&Self> {
                match record {
                    $crate::record::Record::$name(entity) => Some(entity),
                    _ => None,
                }
            }

            fn from_record_mut(record: &mut $crate::record::Record) -> Option<&mut Self> {
                match record {
                    $crate::record::Record::$name(entity) => Some(entity),
                    _ => None,
                }
            }

            fn into_record(self) -> $crate::record::Record {
                $crate::record::Record::$name(self)
            }
        }
    };
}

pub(crate) use transit_entity;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::model::{Route, Stop, Trip};

    #[test]
    fn test_entity_get_and_set_by_name() {
        let mut stop = Stop::new(ScopedId::new("A1", "S1"));
        stop.set("name", FieldValue::String("Main St".to_string())).unwrap();
        stop.set("lat", FieldValue::Float(47.6)).unwrap();

        assert_eq!(stop.name.as_deref(), Some("Main St"));
        assert_eq!(stop.get("lat"), Some(FieldValue::Float(47.6)));
        assert_eq!(stop.get("id"), Some(FieldValue::Id(ScopedId::new("A1", "S1"))));
        assert_eq!(stop.get("missing"), None);
    }

    #[test]
    fn test_entity_set_unknown_field() {
        let mut route = Route::new(ScopedId::new("A1", "R1"));
        let result = route.set("colour", FieldValue::String("red".to_string()));
        assert!(matches!(result, Err(GraphError::UnknownField { .. })));
    }

    #[test]
    fn test_entity_set_rejects_lossy_value() {
        let mut route = Route::new(ScopedId::new("A1", "R1"));
        let result = route.set("route_type", FieldValue::Float(1.5));
        assert!(matches!(result, Err(GraphError::Coercion { .. })));
    }

    #[test]
    fn test_equality_is_identity_only() {
        let mut a = Trip::new(ScopedId::new("A1", "T1"));
        let b = Trip::new(ScopedId::new("A1", "T1"));
        a.headsign = Some("Downtown".to_string());
        assert_eq!(a, b);

        let c = Trip::new(ScopedId::new("A2", "T1"));
        assert_ne!(a, c);
    }

    #[test]
    fn test_entity_to_dict() {
        let mut trip = Trip::new(ScopedId::new("A1", "T1"));
        trip.headsign = Some("Airport".to_string());
        trip.route = Some(EntityRef::Unresolved("R1".to_string()));

        let dict = trip.to_dict();
        assert_eq!(dict.get("headsign"), Some(&FieldValue::String("Airport".to_string())));
        assert_eq!(dict.get("route"), Some(&FieldValue::Ref(EntityRef::Unresolved("R1".to_string()))));
        assert_eq!(dict.get("shape"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_field_value_match_text() {
        let id = FieldValue::Id(ScopedId::new("A1", "S1"));
        assert_eq!(id.match_text(), "S1");
        assert_eq!(FieldValue::Int(4).match_text(), "4");
    }
}
