//! Strategy registry: maps configured strategy names to factories.
//!
//! External strategies register a factory under a name; pipeline files then
//! refer to them by that name alongside the built-in ones.

use std::collections::HashMap;

use crate::error::{GraphError, Result};
use crate::pipeline::config::{PipelineConfig, StrategyConfig};
use crate::pipeline::strategies::{RemoveMatching, RetainMatching, UpdateMatching};
use crate::pipeline::{Strategy, TransformPipeline};

/// Builds a strategy from its configuration entry.
pub type StrategyFactory = Box<dyn Fn(&StrategyConfig) -> Result<Box<dyn Strategy>> + Send + Sync>;

/// Registry of strategy factories
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding `remove`, `retain` and `update`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("remove", |config| {
            Ok(Box::new(RemoveMatching::from_config(config)?) as Box<dyn Strategy>)
        });
        registry.register("retain", |config| {
            Ok(Box::new(RetainMatching::from_config(config)?) as Box<dyn Strategy>)
        });
        registry.register("update", |config| {
            Ok(Box::new(UpdateMatching::from_config(config)?) as Box<dyn Strategy>)
        });
        registry
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&StrategyConfig) -> Result<Box<dyn Strategy>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list_strategies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build one strategy.
    ///
    /// # Arguments
    ///
    /// * `config` - Strategy entry; `config.strategy` selects the factory
    ///
    /// # Returns
    ///
    /// * `Ok(strategy)` - Built strategy
    /// * `Err(GraphError::Config)` - No factory registered under that name
    pub fn build(&self, config: &StrategyConfig) -> Result<Box<dyn Strategy>> {
        let factory = self.factories.get(&config.strategy).ok_or_else(|| {
            GraphError::Config(format!(
                "strategy not found: '{}' (registered: {})",
                config.strategy,
                self.list_strategies().join(", ")
            ))
        })?;
        factory(config)
    }

    /// Build every configured strategy, in order.
    pub fn build_pipeline(&self, config: &PipelineConfig) -> Result<TransformPipeline> {
        let mut pipeline = TransformPipeline::new();
        for entry in &config.strategies {
            pipeline.push(self.build(entry)?);
        }
        Ok(pipeline)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
