//! YAML pipeline configuration.
//!
//! ```yaml
//! store:
//!   strict: false
//!   dangling: unresolve
//! retention:
//!   retain_blocks: false
//! strategies:
//!   - strategy: retain
//!     follow_ownership_only: false
//!     match:
//!       kind: trip
//!       where:
//!         route.short_name: { in: ["10", "12"] }
//!   - strategy: update
//!     match: { kind: stop, where: { name: { matches: "^Old " } } }
//!     set: { zone_id: "Z1" }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;

use crate::error::{GraphError, Result};
use crate::matcher::{Literal, Predicate, TypedEntityMatch};
use crate::model::EntityKind;
use crate::resolver::RawValue;
use crate::retention::RetentionConfig;
use crate::schema::Schema;
use crate::store::StoreConfig;

/// Pipeline configuration: store and retention options plus the ordered
/// strategy list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Run-wide parameters handed to every strategy through the context.
    #[serde(default)]
    pub params: IndexMap<String, JsonValue>,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file.
    ///
    /// # Arguments
    /// * `path` - Path to the pipeline file
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read and `Config` if it is not a
    /// valid pipeline definition
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| GraphError::Io(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml_str(&contents)?;
        tracing::debug!(
            "loaded {} strategy definition(s) from {}",
            config.strategies.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        for strategy in &config.strategies {
            if let Some(selection) = &strategy.selection {
                selection.compile()?;
            }
        }
        Ok(config)
    }
}

/// One configured strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Registered strategy name.
    pub strategy: String,
    /// Display name; defaults to the strategy name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "match")]
    pub selection: Option<MatchConfig>,
    /// Field assignments, resolved against each field's declared type.
    #[serde(default)]
    pub set: IndexMap<String, RawValue>,
    #[serde(default)]
    pub follow_ownership_only: bool,
    #[serde(default)]
    pub params: IndexMap<String, JsonValue>,
}

impl StrategyConfig {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.strategy)
    }

    /// The compiled selection; strategies that act on records require one.
    pub fn require_match(&self) -> Result<TypedEntityMatch> {
        self.selection
            .as_ref()
            .ok_or_else(|| GraphError::Config(format!("strategy '{}' needs a 'match' section", self.label())))?
            .compile()
    }
}

/// Record selection: a kind plus path predicates, all of which must hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    pub kind: String,
    #[serde(default, rename = "where")]
    pub predicates: IndexMap<String, PredicateConfig>,
}

impl MatchConfig {
    pub fn compile(&self) -> Result<TypedEntityMatch> {
        let kind = EntityKind::from_name(&self.kind)
            .ok_or_else(|| GraphError::Config(format!("unknown record kind '{}'", self.kind)))?;
        let mut selection = TypedEntityMatch::new(kind);
        for (path, predicate) in &self.predicates {
            selection = selection.with(path, predicate.compile()?)?;
        }
        selection.validate(&Schema::transit()?)?;
        Ok(selection)
    }
}

/// Predicate as written in YAML: a bare scalar means equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateConfig {
    In {
        #[serde(rename = "in")]
        values: Vec<Literal>,
    },
    Matches {
        matches: String,
    },
    /// `{ null: true }` selects absent values, `{ null: false }` present ones.
    Null {
        null: bool,
    },
    Equals(Literal),
}

impl PredicateConfig {
    pub fn compile(&self) -> Result<Predicate> {
        match self {
            PredicateConfig::In { values } => Ok(Predicate::In(values.clone())),
            PredicateConfig::Matches { matches } => Predicate::matches(matches),
            PredicateConfig::Null { null: true } => Ok(Predicate::IsNull),
            PredicateConfig::Null { null: false } => Ok(Predicate::NotNull),
            PredicateConfig::Equals(literal) => Ok(Predicate::Equals(literal.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DanglingPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PIPELINE: &str = r#"
store:
  strict: true
  dangling: clear
params:
  feed: metro
strategies:
  - strategy: remove
    name: drop-night-routes
    match:
      kind: routes
      where:
        short_name: { in: ["N1", "N2"] }
        route_type: 3
  - strategy: update
    match:
      kind: stop
      where:
        name: { matches: "^Old " }
        parent_station: { null: true }
    set:
      zone_id: Z1
      wheelchair_boarding: 1
"#;

    #[test]
    fn test_parse_pipeline_config() {
        let config = PipelineConfig::from_yaml_str(PIPELINE).unwrap();

        assert!(config.store.strict);
        assert_eq!(config.store.dangling, DanglingPolicy::Clear);
        assert!(!config.retention.retain_blocks);
        assert_eq!(config.params.get("feed"), Some(&JsonValue::from("metro")));
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.strategies[0].label(), "drop-night-routes");
        assert_eq!(config.strategies[1].label(), "update");
        assert_eq!(config.strategies[1].set.get("wheelchair_boarding"), Some(&RawValue::Int(1)));

        let selection = config.strategies[0].require_match().unwrap();
        assert_eq!(selection.kind, EntityKind::Route);
        assert_eq!(selection.predicates.len(), 2);
    }

    #[test]
    fn test_predicate_forms() {
        let eq: PredicateConfig = serde_yaml::from_str("\"10\"").unwrap();
        assert!(matches!(eq.compile().unwrap(), Predicate::Equals(Literal::Text(_))));

        let set: PredicateConfig = serde_yaml::from_str("{ in: [1, 2] }").unwrap();
        assert!(matches!(set.compile().unwrap(), Predicate::In(v) if v.len() == 2));

        let present: PredicateConfig = serde_yaml::from_str("{ null: false }").unwrap();
        assert!(matches!(present.compile().unwrap(), Predicate::NotNull));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let yaml = "strategies:\n  - strategy: remove\n    match: { kind: vehicles }\n";
        assert!(matches!(PipelineConfig::from_yaml_str(yaml), Err(GraphError::Config(_))));
    }

    #[test]
    fn test_misspelled_path_rejected() {
        let yaml = "strategies:\n  - strategy: retain\n    match: { kind: trip, where: { route.shortname: \"10\" } }\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(yaml),
            Err(GraphError::InvalidPath { ref path, .. }) if path == "route.shortname"
        ));

        let below_scalar = "strategies:\n  - strategy: remove\n    match: { kind: stop, where: { name.id: S1 } }\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(below_scalar),
            Err(GraphError::InvalidPath { .. })
        ));

        let through_alias = "strategies:\n  - strategy: remove\n    match: { kind: stop_time, where: { route.shortName: \"10\" } }\n";
        assert!(PipelineConfig::from_yaml_str(through_alias).is_ok());
    }

    #[test]
    fn test_bad_regex_rejected() {
        let yaml = "strategies:\n  - strategy: remove\n    match: { kind: stop, where: { name: { matches: \"(\" } } }\n";
        assert!(PipelineConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PIPELINE.as_bytes()).unwrap();

        let config = PipelineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.strategies.len(), 2);

        let missing = PipelineConfig::load_from_file("/nonexistent/pipeline.yaml");
        assert!(matches!(missing, Err(GraphError::Io(_))));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PipelineConfig::from_yaml_str("{}").unwrap();
        assert!(!config.store.strict);
        assert!(config.strategies.is_empty());
    }
}
