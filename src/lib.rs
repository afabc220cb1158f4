//! # feedgraph: Entity Graph Engine for Transit Schedule Feeds
//!
//! feedgraph loads a schedule feed into an in-memory object graph and runs an
//! ordered list of mutation strategies over it before the records are written
//! back out.
//!
//! ## Features
//!
//! - **Identity-keyed store**: typed collections of records keyed by `(scope, id)`, with reverse indices for every relation
//! - **Path matching**: select records with predicates over dotted property paths such as `stopTimes.stop.id`
//! - **Reference resolution**: coerce raw feed values into typed fields and resolve forward references in a second pass
//! - **Retention graph**: mark-and-sweep and cascading removal across ownership edges
//! - **Strategy pipeline**: YAML-configured strategies run in order against one shared store
//!
//! ## Example: Pipeline
//!
//! ```yaml
//! store:
//!   strict: false
//! strategies:
//!   - strategy: retain
//!     match:
//!       kind: trip
//!       where:
//!         route.short_name: { in: ["10", "12"] }
//!   - strategy: remove
//!     match:
//!       kind: stop
//!       where:
//!         stop_times: { null: true }
//! ```

// Core modules
pub mod error;
pub mod identity;
pub mod entity;
pub mod model;
pub mod record;
pub mod schema;
pub mod store;

// Selection, resolution and retention
pub mod path;
pub mod matcher;
pub mod resolver;
pub mod retention;

// Strategy pipeline
pub mod pipeline;

// Loader and writer boundaries
pub mod ingest;
pub mod serialization;

// Re-export key types
pub use entity::{Entity, FieldValue};
pub use error::{GraphError, PipelineError, Result};
pub use identity::{EntityRef, ScopedId};
pub use model::EntityKind;
pub use record::{Record, RecordKey};
pub use schema::Schema;
pub use store::{DanglingPolicy, EntityStore, StoreConfig};

pub use matcher::{PathMatcher, PathPredicate, Predicate, TypedEntityMatch};
pub use path::PropertyPath;
pub use resolver::{DeferredQueue, DeferredReference, RawValue, ResolveMode, ValueResolver};
pub use retention::{RetentionConfig, RetentionGraph, SweepReport};

pub use pipeline::{
    PipelineConfig, PipelineReport, Strategy, StrategyRegistry, StrategyReport, TransformContext, TransformPipeline,
};

pub use ingest::{FeedDocument, FeedLoader, LoadReport, RawRow};
pub use serialization::{write_store, NdjsonWriter};
