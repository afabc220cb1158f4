//! Context handed to every strategy in a pipeline run.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::retention::RetentionConfig;
use crate::store::EntityStore;

/// Run-wide parameters plus an optional read-only reference store.
///
/// Parameters are opaque to the engine; strategies read whatever keys they
/// understand. The reference store is never merged into the live store.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    params: IndexMap<String, JsonValue>,
    retention: RetentionConfig,
    reference: Option<Arc<EntityStore>>,
}

impl TransformContext {
    /// Create a context with initial parameters.
    ///
    /// # Arguments
    /// * `params` - Run-wide parameters (e.g. feed name, agency filter)
    pub fn new(params: IndexMap<String, JsonValue>) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    /// Attach a second, read-only store for comparison.
    pub fn with_reference_store(mut self, store: Arc<EntityStore>) -> Self {
        self.reference = Some(store);
        self
    }

    pub fn get_param(&self, key: &str) -> Option<&JsonValue> {
        self.params.get(key)
    }

    /// String parameter, if present and a string.
    pub fn get_param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: JsonValue) {
        self.params.insert(key.into(), value);
    }

    pub fn params(&self) -> &IndexMap<String, JsonValue> {
        &self.params
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    pub fn reference_store(&self) -> Option<&EntityStore> {
        self.reference.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params() {
        let mut ctx = TransformContext::empty();
        assert!(ctx.get_param("feed").is_none());

        ctx.set_param("feed", json!("metro"));
        ctx.set_param("limit", json!(5));

        assert_eq!(ctx.get_param_str("feed"), Some("metro"));
        assert_eq!(ctx.get_param_str("limit"), None);
        assert_eq!(ctx.params().len(), 2);
    }

    #[test]
    fn test_reference_store_is_optional() {
        let ctx = TransformContext::empty();
        assert!(ctx.reference_store().is_none());

        let reference = EntityStore::transit(Default::default()).unwrap();
        let ctx = ctx.with_reference_store(Arc::new(reference));
        assert!(ctx.reference_store().is_some_and(|s| s.is_empty()));
    }
}
