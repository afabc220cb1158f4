//! Error taxonomy for the entity graph engine.
//!
//! Every fatal error carries enough context (record kind, id, field name) to
//! diagnose it without re-running the pipeline. Recoverable conditions are not
//! raised; they are aggregated into counters by the caller.

use thiserror::Error;

use crate::model::EntityKind;

/// Errors raised by the store, resolver, matcher and retention graph.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    /// Eager reference resolution found no matching record.
    #[error("missing {kind} '{id}' referenced by field '{field}'")]
    MissingEntity {
        kind: EntityKind,
        id: String,
        field: String,
    },

    /// A raw value cannot be converted to a field's declared type.
    #[error("cannot coerce '{raw}' into {target} for field '{field}': {reason}")]
    Coercion {
        field: String,
        raw: String,
        target: String,
        reason: String,
    },

    /// Removal would orphan an ownership dependent while in strict mode.
    #[error(
        "removing {kind} '{id}' would orphan {dependent_kind} '{dependent_id}' via relation '{relation}'"
    )]
    DanglingReference {
        kind: EntityKind,
        id: String,
        dependent_kind: EntityKind,
        dependent_id: String,
        relation: String,
    },

    /// A raw input row is structurally invalid. Always recoverable.
    #[error("malformed {kind} row {line}: {reason}")]
    MalformedInput {
        kind: EntityKind,
        line: usize,
        reason: String,
    },

    /// A deferred reference is still unresolved after the full load completed.
    #[error("{kind} '{id}' field '{field}' still references unknown {target} '{raw}'")]
    UnresolvedDeferredReference {
        kind: EntityKind,
        id: String,
        field: String,
        target: EntityKind,
        raw: String,
    },

    /// The record does not exist in the store.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    /// A field name that the record kind does not declare.
    #[error("{kind} has no field '{field}'")]
    UnknownField { kind: EntityKind, field: String },

    /// A path expression or predicate that cannot be compiled.
    #[error("invalid path expression '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Configuration that cannot be loaded or interpreted.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure while reading feeds or writing output.
    #[error("I/O error: {0}")]
    Io(String),
}

impl GraphError {
    /// Whether the condition may be counted and skipped instead of aborting a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GraphError::MalformedInput { .. } | GraphError::UnresolvedDeferredReference { .. }
        )
    }
}

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> Self {
        GraphError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Config(format!("JSON: {}", err))
    }
}

impl From<serde_yaml::Error> for GraphError {
    fn from(err: serde_yaml::Error) -> Self {
        GraphError::Config(format!("YAML: {}", err))
    }
}

/// A fatal strategy failure, tagged with the strategy that raised it.
#[derive(Debug, Error)]
#[error("strategy #{index} '{strategy}' failed: {source}")]
pub struct PipelineError {
    pub strategy: String,
    pub index: usize,
    #[source]
    pub source: GraphError,
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = GraphError::MissingEntity {
            kind: EntityKind::Route,
            id: "A1_R9".to_string(),
            field: "route".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("route"));
        assert!(msg.contains("A1_R9"));
    }

    #[test]
    fn test_recoverable_classification() {
        let malformed = GraphError::MalformedInput {
            kind: EntityKind::Stop,
            line: 4,
            reason: "bad lat".to_string(),
        };
        assert!(malformed.is_recoverable());

        let coercion = GraphError::Coercion {
            field: "stop_sequence".to_string(),
            raw: "1.5".to_string(),
            target: "int".to_string(),
            reason: "fraction".to_string(),
        };
        assert!(!coercion.is_recoverable());
    }
}
