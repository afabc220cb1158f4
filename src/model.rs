//! Schedule-data domain model.
//!
//! The relation set is fixed here: each reference field declares its target
//! kind, the reverse relation name on that target, and the edge semantics
//! used for cascading removal and retention.

use chrono::NaiveDate;
use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::{transit_entity, Entity};
use crate::identity::{EntityRef, ScopedId};
use crate::record::Record;
use crate::schema::{FieldDef, FieldKind, RefDef};

/// Declared kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Agency,
    Route,
    Trip,
    Block,
    Stop,
    StopTime,
    Frequency,
    ServiceCalendar,
    CalendarDate,
    Shape,
    ShapePoint,
    FareAttribute,
    FareRule,
    Pathway,
    Transfer,
}

/// Whether a kind's identity carries a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Bare,
    Scoped,
}

impl EntityKind {
    pub const ALL: &'static [EntityKind] = &[
        EntityKind::Agency,
        EntityKind::Route,
        EntityKind::Trip,
        EntityKind::Block,
        EntityKind::Stop,
        EntityKind::StopTime,
        EntityKind::Frequency,
        EntityKind::ServiceCalendar,
        EntityKind::CalendarDate,
        EntityKind::Shape,
        EntityKind::ShapePoint,
        EntityKind::FareAttribute,
        EntityKind::FareRule,
        EntityKind::Pathway,
        EntityKind::Transfer,
    ];

    /// Fixed order in which writers emit collections.
    pub const EMISSION_ORDER: &'static [EntityKind] = &[
        EntityKind::Agency,
        EntityKind::Stop,
        EntityKind::Route,
        EntityKind::ServiceCalendar,
        EntityKind::CalendarDate,
        EntityKind::Shape,
        EntityKind::ShapePoint,
        EntityKind::Block,
        EntityKind::Trip,
        EntityKind::StopTime,
        EntityKind::Frequency,
        EntityKind::FareAttribute,
        EntityKind::FareRule,
        EntityKind::Pathway,
        EntityKind::Transfer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Agency => "agency",
            EntityKind::Route => "route",
            EntityKind::Trip => "trip",
            EntityKind::Block => "block",
            EntityKind::Stop => "stop",
            EntityKind::StopTime => "stop_time",
            EntityKind::Frequency => "frequency",
            EntityKind::ServiceCalendar => "service_calendar",
            EntityKind::CalendarDate => "calendar_date",
            EntityKind::Shape => "shape",
            EntityKind::ShapePoint => "shape_point",
            EntityKind::FareAttribute => "fare_attribute",
            EntityKind::FareRule => "fare_rule",
            EntityKind::Pathway => "pathway",
            EntityKind::Transfer => "transfer",
        }
    }

    /// Feed table holding rows of this kind. Kinds without a table are
    /// created implicitly from references.
    pub fn table(&self) -> Option<&'static str> {
        match self {
            EntityKind::Agency => Some("agency"),
            EntityKind::Route => Some("routes"),
            EntityKind::Trip => Some("trips"),
            EntityKind::Stop => Some("stops"),
            EntityKind::StopTime => Some("stop_times"),
            EntityKind::Frequency => Some("frequencies"),
            EntityKind::ServiceCalendar => Some("calendar"),
            EntityKind::CalendarDate => Some("calendar_dates"),
            EntityKind::ShapePoint => Some("shapes"),
            EntityKind::FareAttribute => Some("fare_attributes"),
            EntityKind::FareRule => Some("fare_rules"),
            EntityKind::Pathway => Some("pathways"),
            EntityKind::Transfer => Some("transfers"),
            EntityKind::Block | EntityKind::Shape => None,
        }
    }

    /// Column carrying the local id. `None` means ids are assigned sequentially.
    pub fn id_column(&self) -> Option<&'static str> {
        match self {
            EntityKind::Agency => Some("agency_id"),
            EntityKind::Route => Some("route_id"),
            EntityKind::Trip => Some("trip_id"),
            EntityKind::Stop => Some("stop_id"),
            EntityKind::ServiceCalendar => Some("service_id"),
            EntityKind::FareAttribute => Some("fare_id"),
            EntityKind::Pathway => Some("pathway_id"),
            _ => None,
        }
    }

    pub fn id_kind(&self) -> IdKind {
        match self {
            EntityKind::Agency => IdKind::Bare,
            _ => IdKind::Scoped,
        }
    }

    /// Kinds that have no feed table and exist only because something refers to them.
    pub fn is_implicit(&self) -> bool {
        matches!(self, EntityKind::Block | EntityKind::Shape)
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        match self {
            EntityKind::Agency => Agency::FIELDS,
            EntityKind::Route => Route::FIELDS,
            EntityKind::Trip => Trip::FIELDS,
            EntityKind::Block => Block::FIELDS,
            EntityKind::Stop => Stop::FIELDS,
            EntityKind::StopTime => StopTime::FIELDS,
            EntityKind::Frequency => Frequency::FIELDS,
            EntityKind::ServiceCalendar => ServiceCalendar::FIELDS,
            EntityKind::CalendarDate => CalendarDate::FIELDS,
            EntityKind::Shape => Shape::FIELDS,
            EntityKind::ShapePoint => ShapePoint::FIELDS,
            EntityKind::FareAttribute => FareAttribute::FIELDS,
            EntityKind::FareRule => FareRule::FIELDS,
            EntityKind::Pathway => Pathway::FIELDS,
            EntityKind::Transfer => Transfer::FIELDS,
        }
    }

    /// Empty record of this kind with the given identity.
    pub fn new_record(&self, id: ScopedId) -> Record {
        match self {
            EntityKind::Agency => Agency::new(id).into(),
            EntityKind::Route => Route::new(id).into(),
            EntityKind::Trip => Trip::new(id).into(),
            EntityKind::Block => Block::new(id).into(),
            EntityKind::Stop => Stop::new(id).into(),
            EntityKind::StopTime => StopTime::new(id).into(),
            EntityKind::Frequency => Frequency::new(id).into(),
            EntityKind::ServiceCalendar => ServiceCalendar::new(id).into(),
            EntityKind::CalendarDate => CalendarDate::new(id).into(),
            EntityKind::Shape => Shape::new(id).into(),
            EntityKind::ShapePoint => ShapePoint::new(id).into(),
            EntityKind::FareAttribute => FareAttribute::new(id).into(),
            EntityKind::FareRule => FareRule::new(id).into(),
            EntityKind::Pathway => Pathway::new(id).into(),
            EntityKind::Transfer => Transfer::new(id).into(),
        }
    }

    /// Look a kind up by name, table name or a camel-case spelling of either.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().trim_end_matches(".txt").to_case(Case::Snake);
        EntityKind::ALL
            .iter()
            .find(|kind| kind.name() == normalized || kind.table() == Some(normalized.as_str()))
            .copied()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

transit_entity! {
    /// A transit operator. Agency ids are bare and double as feed scopes.
    pub struct Agency {
        name: String = "agency_name" => FieldKind::TEXT,
        url: String = "agency_url" => FieldKind::TEXT,
        timezone: String = "agency_timezone" => FieldKind::TEXT,
        lang: Option<String> = "agency_lang" => FieldKind::TEXT,
        phone: Option<String> = "agency_phone" => FieldKind::TEXT,
    }
}

transit_entity! {
    pub struct Route {
        agency: Option<EntityRef> = "agency_id" => FieldKind::Ref(RefDef::owned_by(EntityKind::Agency, "routes")),
        short_name: Option<String> = "route_short_name" => FieldKind::TEXT,
        long_name: Option<String> = "route_long_name" => FieldKind::TEXT,
        desc: Option<String> = "route_desc" => FieldKind::TEXT,
        route_type: i64 = "route_type" => FieldKind::INT,
        url: Option<String> = "route_url" => FieldKind::TEXT,
        color: Option<String> = "route_color" => FieldKind::TEXT,
        text_color: Option<String> = "route_text_color" => FieldKind::TEXT,
    }
}

transit_entity! {
    pub struct Trip {
        route: Option<EntityRef> = "route_id" => FieldKind::Ref(RefDef::owned_by(EntityKind::Route, "trips")),
        service: Option<EntityRef> = "service_id" => FieldKind::Ref(RefDef::retaining(EntityKind::ServiceCalendar, "trips")),
        headsign: Option<String> = "trip_headsign" => FieldKind::TEXT,
        short_name: Option<String> = "trip_short_name" => FieldKind::TEXT,
        direction_id: Option<i64> = "direction_id" => FieldKind::INT,
        block: Option<EntityRef> = "block_id" => FieldKind::Ref(RefDef::block(EntityKind::Block, "trips")),
        shape: Option<EntityRef> = "shape_id" => FieldKind::Ref(RefDef::retaining(EntityKind::Shape, "trips")),
        wheelchair_accessible: Option<i64> = "wheelchair_accessible" => FieldKind::INT,
    }
}

transit_entity! {
    /// Operational grouping of trips run by the same vehicle.
    pub struct Block {}
}

transit_entity! {
    pub struct Stop {
        name: Option<String> = "stop_name" => FieldKind::TEXT,
        code: Option<String> = "stop_code" => FieldKind::TEXT,
        desc: Option<String> = "stop_desc" => FieldKind::TEXT,
        lat: f64 = "stop_lat" => FieldKind::FLOAT,
        lon: f64 = "stop_lon" => FieldKind::FLOAT,
        zone_id: Option<String> = "zone_id" => FieldKind::TEXT,
        url: Option<String> = "stop_url" => FieldKind::TEXT,
        location_type: Option<i64> = "location_type" => FieldKind::INT,
        parent_station: Option<EntityRef> = "parent_station" => FieldKind::Ref(RefDef::retaining(EntityKind::Stop, "children")),
        wheelchair_boarding: Option<i64> = "wheelchair_boarding" => FieldKind::INT,
    }
}

transit_entity! {
    pub struct StopTime {
        trip: Option<EntityRef> = "trip_id" => FieldKind::Ref(RefDef::component_of(EntityKind::Trip, "stop_times")),
        stop: Option<EntityRef> = "stop_id" => FieldKind::Ref(RefDef::retaining(EntityKind::Stop, "stop_times")),
        stop_sequence: i64 = "stop_sequence" => FieldKind::INT,
        /// Seconds past service-day midnight.
        arrival_time: Option<i64> = "arrival_time" => FieldKind::TIME,
        departure_time: Option<i64> = "departure_time" => FieldKind::TIME,
        stop_headsign: Option<String> = "stop_headsign" => FieldKind::TEXT,
        pickup_type: Option<i64> = "pickup_type" => FieldKind::INT,
        drop_off_type: Option<i64> = "drop_off_type" => FieldKind::INT,
        shape_dist_traveled: Option<f64> = "shape_dist_traveled" => FieldKind::FLOAT,
    }
}

transit_entity! {
    pub struct Frequency {
        trip: Option<EntityRef> = "trip_id" => FieldKind::Ref(RefDef::component_of(EntityKind::Trip, "frequencies")),
        start_time: i64 = "start_time" => FieldKind::TIME,
        end_time: i64 = "end_time" => FieldKind::TIME,
        headway_secs: i64 = "headway_secs" => FieldKind::INT,
        exact_times: Option<bool> = "exact_times" => FieldKind::BOOL,
    }
}

transit_entity! {
    /// Weekly service pattern; its id is the feed's `service_id`.
    pub struct ServiceCalendar {
        monday: bool = "monday" => FieldKind::BOOL,
        tuesday: bool = "tuesday" => FieldKind::BOOL,
        wednesday: bool = "wednesday" => FieldKind::BOOL,
        thursday: bool = "thursday" => FieldKind::BOOL,
        friday: bool = "friday" => FieldKind::BOOL,
        saturday: bool = "saturday" => FieldKind::BOOL,
        sunday: bool = "sunday" => FieldKind::BOOL,
        start_date: Option<NaiveDate> = "start_date" => FieldKind::DATE,
        end_date: Option<NaiveDate> = "end_date" => FieldKind::DATE,
    }
}

transit_entity! {
    pub struct CalendarDate {
        service: Option<EntityRef> = "service_id" => FieldKind::Ref(RefDef::component_of(EntityKind::ServiceCalendar, "dates")),
        date: Option<NaiveDate> = "date" => FieldKind::DATE,
        exception_type: i64 = "exception_type" => FieldKind::INT,
    }
}

transit_entity! {
    pub struct Shape {}
}

transit_entity! {
    pub struct ShapePoint {
        shape: Option<EntityRef> = "shape_id" => FieldKind::Ref(RefDef::component_of(EntityKind::Shape, "points")),
        lat: f64 = "shape_pt_lat" => FieldKind::FLOAT,
        lon: f64 = "shape_pt_lon" => FieldKind::FLOAT,
        sequence: i64 = "shape_pt_sequence" => FieldKind::INT,
        dist_traveled: Option<f64> = "shape_dist_traveled" => FieldKind::FLOAT,
    }
}

transit_entity! {
    pub struct FareAttribute {
        price: f64 = "price" => FieldKind::FLOAT,
        currency_type: String = "currency_type" => FieldKind::TEXT,
        payment_method: i64 = "payment_method" => FieldKind::INT,
        transfers: Option<i64> = "transfers" => FieldKind::INT,
        transfer_duration: Option<i64> = "transfer_duration" => FieldKind::INT,
        agency: Option<EntityRef> = "agency_id" => FieldKind::Ref(RefDef::owned_by(EntityKind::Agency, "fares")),
    }
}

transit_entity! {
    pub struct FareRule {
        fare: Option<EntityRef> = "fare_id" => FieldKind::Ref(RefDef::component_of(EntityKind::FareAttribute, "rules")),
        route: Option<EntityRef> = "route_id" => FieldKind::Ref(RefDef::lookup(EntityKind::Route, "fare_rules")),
        origin_id: Option<String> = "origin_id" => FieldKind::TEXT,
        destination_id: Option<String> = "destination_id" => FieldKind::TEXT,
        contains_id: Option<String> = "contains_id" => FieldKind::TEXT,
    }
}

transit_entity! {
    /// Walkable link between two locations inside a station.
    pub struct Pathway {
        from_stop: Option<EntityRef> = "from_stop_id" => FieldKind::Ref(RefDef::retaining(EntityKind::Stop, "pathways_from")),
        to_stop: Option<EntityRef> = "to_stop_id" => FieldKind::Ref(RefDef::retaining(EntityKind::Stop, "pathways_to")),
        pathway_mode: i64 = "pathway_mode" => FieldKind::INT,
        is_bidirectional: bool = "is_bidirectional" => FieldKind::BOOL,
        traversal_time: Option<i64> = "traversal_time" => FieldKind::INT,
    }
}

transit_entity! {
    pub struct Transfer {
        from_stop: Option<EntityRef> = "from_stop_id" => FieldKind::Ref(RefDef::retaining(EntityKind::Stop, "transfers_from")),
        to_stop: Option<EntityRef> = "to_stop_id" => FieldKind::Ref(RefDef::retaining(EntityKind::Stop, "transfers_to")),
        transfer_type: i64 = "transfer_type" => FieldKind::INT,
        min_transfer_time: Option<i64> = "min_transfer_time" => FieldKind::INT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_lookup_by_name_and_table() {
        assert_eq!(EntityKind::from_name("trip"), Some(EntityKind::Trip));
        assert_eq!(EntityKind::from_name("trips"), Some(EntityKind::Trip));
        assert_eq!(EntityKind::from_name("stop_times.txt"), Some(EntityKind::StopTime));
        assert_eq!(EntityKind::from_name("StopTime"), Some(EntityKind::StopTime));
        assert_eq!(EntityKind::from_name("calendar"), Some(EntityKind::ServiceCalendar));
        assert_eq!(EntityKind::from_name("vehicles"), None);
    }

    #[test]
    fn test_every_kind_is_emitted_once() {
        assert_eq!(EntityKind::EMISSION_ORDER.len(), EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            assert!(EntityKind::EMISSION_ORDER.contains(kind));
        }
    }

    #[test]
    fn test_new_record_has_matching_kind() {
        for kind in EntityKind::ALL {
            let record = kind.new_record(ScopedId::new("A1", "x"));
            assert_eq!(record.kind(), *kind);
        }
    }

    #[test]
    fn test_agency_identity_is_bare() {
        assert_eq!(EntityKind::Agency.id_kind(), IdKind::Bare);
        assert_eq!(EntityKind::Trip.id_kind(), IdKind::Scoped);
    }
}
