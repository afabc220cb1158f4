//! Ordered strategy execution over a shared store.
//!
//! Strategies run strictly in configured order with no isolation between
//! them. A fatal error stops the run; recoverable conditions are returned as
//! counters in each strategy's report.

pub mod config;
pub mod context;
pub mod partition;
pub mod registry;
pub mod strategies;

pub use config::{MatchConfig, PipelineConfig, PredicateConfig, StrategyConfig};
pub use context::TransformContext;
pub use partition::{default_workers, enrich_trips, partition_trips, run_partitioned, FieldWrite, TripPartition};
pub use registry::StrategyRegistry;
pub use strategies::{RemoveMatching, RetainMatching, UpdateMatching};

use indexmap::IndexMap;
use std::fmt;
use std::time::Instant;

use crate::error::{GraphError, PipelineError, Result};
use crate::store::EntityStore;

/// An external unit of mutation run against the store.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Mutate the store.
    ///
    /// # Returns
    /// * `Ok(report)` - Completed, possibly with recoverable conditions counted
    /// * `Err(err)` - Fatal; the pipeline stops
    fn run(&self, context: &mut TransformContext, store: &mut EntityStore) -> Result<StrategyReport>;
}

/// Strategy backed by a closure.
pub struct FnStrategy<F> {
    name: String,
    func: F,
}

impl<F> FnStrategy<F>
where
    F: Fn(&mut TransformContext, &mut EntityStore) -> Result<StrategyReport> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Strategy for FnStrategy<F>
where
    F: Fn(&mut TransformContext, &mut EntityStore) -> Result<StrategyReport> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, context: &mut TransformContext, store: &mut EntityStore) -> Result<StrategyReport> {
        (self.func)(context, store)
    }
}

/// Per-strategy counters and recoverable conditions.
#[derive(Debug, Clone, Default)]
pub struct StrategyReport {
    pub counters: IndexMap<String, usize>,
    pub recoverable: Vec<GraphError>,
}

impl StrategyReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, counter: &str, by: usize) {
        *self.counters.entry(counter.to_string()).or_insert(0) += by;
    }

    pub fn count(&self, counter: &str) -> usize {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    /// Record a condition that was skipped rather than raised.
    pub fn record_recoverable(&mut self, err: GraphError) {
        tracing::warn!("{}", err);
        self.add("recoverable", 1);
        self.recoverable.push(err);
    }
}

impl fmt::Display for StrategyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .counters
            .iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Reports of every strategy that ran, in order.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub strategies: Vec<(String, StrategyReport)>,
}

impl PipelineReport {
    /// Sum of a counter across strategies.
    pub fn total(&self, counter: &str) -> usize {
        self.strategies.iter().map(|(_, r)| r.count(counter)).sum()
    }
}

/// Runs strategies sequentially against one store.
#[derive(Default)]
pub struct TransformPipeline {
    strategies: Vec<Box<dyn Strategy>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    pub fn with(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run every strategy in order, stopping at the first fatal error.
    ///
    /// Mutations made before the failure are kept.
    pub fn run(
        &self,
        context: &mut TransformContext,
        store: &mut EntityStore,
    ) -> std::result::Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::default();

        for (index, strategy) in self.strategies.iter().enumerate() {
            let started = Instant::now();
            tracing::info!("[{}/{}] running strategy '{}'", index + 1, self.strategies.len(), strategy.name());

            let outcome = strategy.run(context, store).map_err(|source| {
                tracing::error!("strategy '{}' failed: {}", strategy.name(), source);
                PipelineError {
                    strategy: strategy.name().to_string(),
                    index,
                    source,
                }
            })?;

            tracing::info!(
                "strategy '{}' finished in {:?}: {}",
                strategy.name(),
                started.elapsed(),
                outcome
            );
            report.strategies.push((strategy.name().to_string(), outcome));
        }

        tracing::info!("pipeline complete: {} record(s) in store", store.len());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ScopedId;
    use crate::model::{EntityKind, Route};
    use crate::store::StoreConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn store() -> EntityStore {
        EntityStore::transit(StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_second_strategy_sees_first_strategy_mutations() {
        let pipeline = TransformPipeline::new()
            .with(FnStrategy::new("add-route", |_ctx, store| {
                store.save(Route::new(ScopedId::new("A1", "R1")));
                Ok(StrategyReport::new())
            }))
            .with(FnStrategy::new("count-routes", |ctx, store| {
                let mut report = StrategyReport::new();
                report.add("routes", store.count(EntityKind::Route));
                ctx.set_param("seen", serde_json::json!(store.count(EntityKind::Route)));
                Ok(report)
            }));

        let mut ctx = TransformContext::empty();
        let mut store = store();
        let report = pipeline.run(&mut ctx, &mut store).unwrap();

        assert_eq!(report.total("routes"), 1);
        assert_eq!(ctx.get_param("seen"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_fatal_error_stops_pipeline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let after = Arc::clone(&ran);
        let pipeline = TransformPipeline::new()
            .with(FnStrategy::new("fails", |_ctx, _store| {
                Err(GraphError::NotFound {
                    kind: EntityKind::Trip,
                    id: "A1_T1".to_string(),
                })
            }))
            .with(FnStrategy::new("never", move |_ctx, _store| {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(StrategyReport::new())
            }));

        let err = pipeline
            .run(&mut TransformContext::empty(), &mut store())
            .unwrap_err();

        assert_eq!(err.strategy, "fails");
        assert_eq!(err.index, 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_recoverable_conditions_do_not_stop_pipeline() {
        let pipeline = TransformPipeline::new()
            .with(FnStrategy::new("skips-a-row", |_ctx, _store| {
                let mut report = StrategyReport::new();
                report.record_recoverable(GraphError::MalformedInput {
                    kind: EntityKind::Stop,
                    line: 3,
                    reason: "bad latitude".to_string(),
                });
                Ok(report)
            }))
            .with(FnStrategy::new("noop", |_ctx, _store| Ok(StrategyReport::new())));

        let report = pipeline
            .run(&mut TransformContext::empty(), &mut store())
            .unwrap();
        assert_eq!(report.strategies.len(), 2);
        assert_eq!(report.total("recoverable"), 1);
    }
}
