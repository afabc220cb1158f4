//! The `Record` sum type over every record kind.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::{Entity, FieldValue};
use crate::error::Result;
use crate::identity::ScopedId;
use crate::model::{
    Agency, Block, CalendarDate, EntityKind, FareAttribute, FareRule, Frequency, Pathway, Route,
    ServiceCalendar, Shape, ShapePoint, Stop, StopTime, Transfer, Trip,
};
use crate::schema::FieldDef;

/// A record of exactly one declared kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Agency(Agency),
    Route(Route),
    Trip(Trip),
    Block(Block),
    Stop(Stop),
    StopTime(StopTime),
    Frequency(Frequency),
    ServiceCalendar(ServiceCalendar),
    CalendarDate(CalendarDate),
    Shape(Shape),
    ShapePoint(ShapePoint),
    FareAttribute(FareAttribute),
    FareRule(FareRule),
    Pathway(Pathway),
    Transfer(Transfer),
}

macro_rules! dispatch {
    ($record:expr, $entity:ident => $body:expr) => {
        match $record {
            Record::Agency($entity) => $body,
            Record::Route($entity) => $body,
            Record::Trip($entity) => $body,
            Record::Block($entity) => $body,
            Record::Stop($entity) => $body,
            Record::StopTime($entity) => $body,
            Record::Frequency($entity) => $body,
            Record::ServiceCalendar($entity) => $body,
            Record::CalendarDate($entity) => $body,
            Record::Shape($entity) => $body,
            Record::ShapePoint($entity) => $body,
            Record::FareAttribute($entity) => $body,
            Record::FareRule($entity) => $body,
            Record::Pathway($entity) => $body,
            Record::Transfer($entity) => $body,
        }
    };
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Agency(_) => EntityKind::Agency,
            Record::Route(_) => EntityKind::Route,
            Record::Trip(_) => EntityKind::Trip,
            Record::Block(_) => EntityKind::Block,
            Record::Stop(_) => EntityKind::Stop,
            Record::StopTime(_) => EntityKind::StopTime,
            Record::Frequency(_) => EntityKind::Frequency,
            Record::ServiceCalendar(_) => EntityKind::ServiceCalendar,
            Record::CalendarDate(_) => EntityKind::CalendarDate,
            Record::Shape(_) => EntityKind::Shape,
            Record::ShapePoint(_) => EntityKind::ShapePoint,
            Record::FareAttribute(_) => EntityKind::FareAttribute,
            Record::FareRule(_) => EntityKind::FareRule,
            Record::Pathway(_) => EntityKind::Pathway,
            Record::Transfer(_) => EntityKind::Transfer,
        }
    }

    pub fn id(&self) -> &ScopedId {
        dispatch!(self, entity => entity.id())
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.kind(), self.id().clone())
    }

    pub fn set_id(&mut self, id: ScopedId) {
        dispatch!(self, entity => entity.set_id(id))
    }

    pub fn get(&self, field: &str) -> Option<FieldValue> {
        dispatch!(self, entity => entity.get(field))
    }

    pub fn set(&mut self, field: &str, value: FieldValue) -> Result<()> {
        dispatch!(self, entity => entity.set(field, value))
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        self.kind().fields()
    }

    /// Typed view of the record, if it is of kind `T`.
    pub fn downcast<T: Entity>(&self) -> Option<&T> {
        T::from_record(self)
    }

    pub fn downcast_mut<T: Entity>(&mut self) -> Option<&mut T> {
        T::from_record_mut(self)
    }
}

/// Kind-qualified identity: unique across the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: EntityKind,
    pub id: ScopedId,
}

impl RecordKey {
    pub fn new(kind: EntityKind, id: ScopedId) -> Self {
        Self { kind, id }
    }

    pub fn of<T: Entity>(id: ScopedId) -> Self {
        Self::new(T::KIND, id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EntityRef;

    #[test]
    fn test_record_dispatch() {
        let mut record: Record = Trip::new(ScopedId::new("A1", "T1")).into();
        assert_eq!(record.kind(), EntityKind::Trip);
        assert_eq!(record.id(), &ScopedId::new("A1", "T1"));

        record
            .set("route", FieldValue::Ref(EntityRef::Unresolved("R1".to_string())))
            .unwrap();
        let trip = record.downcast::<Trip>().unwrap();
        assert_eq!(trip.route, Some(EntityRef::Unresolved("R1".to_string())));
        assert!(record.downcast::<Route>().is_none());
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let record: Record = Stop::new(ScopedId::new("A1", "S1")).into();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "stop");
        assert_eq!(json["id"]["id"], "S1");
    }

    #[test]
    fn test_record_key_display() {
        let key = RecordKey::of::<Route>(ScopedId::new("A1", "R1"));
        assert_eq!(key.to_string(), "route 'A1_R1'");
    }
}
