//! Plan ingestion: provider-specific planner output to [`ChangeDocument`].
//!
//! Each cloud has a [`PlanNormalizer`] registered in a [`NormalizerRegistry`].
//! Ingestion is a pure transformation; nothing here performs I/O.

mod terraform;
mod text;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use driftwatch_model::{ChangeDocument, Cloud, Environment, ResourceChange};
use serde_json::Value;
use tracing::debug;

use crate::error::{DriftError, Result};

pub use terraform::TerraformNormalizer;
pub use text::parse_text_plan;

/// Planner output as handed over by the planner collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPlan {
    /// Already-decoded JSON plan.
    Structured(Value),
    /// JSON plan bytes, decoded during ingestion.
    Bytes(Vec<u8>),
    /// Human-readable plan output.
    Text(String),
}

impl From<Value> for RawPlan {
    fn from(value: Value) -> Self {
        RawPlan::Structured(value)
    }
}

/// Turns one provider's structured plan into normalized resource changes.
pub trait PlanNormalizer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Extract the resource changes from a decoded plan.
    fn normalize(&self, plan: &Value) -> Result<Vec<ResourceChange>>;
}

/// Normalizers keyed by cloud, with a fallback for unregistered clouds.
#[derive(Clone)]
pub struct NormalizerRegistry {
    by_cloud: HashMap<Cloud, Arc<dyn PlanNormalizer>>,
    fallback: Arc<dyn PlanNormalizer>,
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty(Arc::new(TerraformNormalizer::generic()));
        registry.register(Cloud::Aws, Arc::new(TerraformNormalizer::aws()));
        registry.register(Cloud::Gcp, Arc::new(TerraformNormalizer::gcp()));
        registry
    }
}

impl NormalizerRegistry {
    /// Registry with only a fallback normalizer.
    pub fn empty(fallback: Arc<dyn PlanNormalizer>) -> Self {
        Self {
            by_cloud: HashMap::new(),
            fallback,
        }
    }

    /// Register (or replace) the normalizer for a cloud.
    pub fn register(&mut self, cloud: Cloud, normalizer: Arc<dyn PlanNormalizer>) {
        self.by_cloud.insert(cloud, normalizer);
    }

    pub fn normalizer_for(&self, cloud: &Cloud) -> &dyn PlanNormalizer {
        self.by_cloud
            .get(cloud)
            .map(|n| &**n)
            .unwrap_or(&*self.fallback)
    }

    /// Ingest a plan. `generated_at` comes from the plan's `timestamp` when
    /// present, otherwise the current time.
    pub fn ingest(
        &self,
        raw: &RawPlan,
        cloud: Cloud,
        environment: Environment,
    ) -> Result<ChangeDocument> {
        self.ingest_with_default_time(raw, cloud, environment, Utc::now())
    }

    /// Ingest with a fixed timestamp, ignoring any timestamp in the plan.
    pub fn ingest_at(
        &self,
        raw: &RawPlan,
        cloud: Cloud,
        environment: Environment,
        generated_at: DateTime<Utc>,
    ) -> Result<ChangeDocument> {
        let changes = self.changes_of(raw, &cloud)?;
        Ok(ChangeDocument::new(cloud, environment, generated_at, changes)?)
    }

    fn ingest_with_default_time(
        &self,
        raw: &RawPlan,
        cloud: Cloud,
        environment: Environment,
        now: DateTime<Utc>,
    ) -> Result<ChangeDocument> {
        let generated_at = match raw {
            RawPlan::Structured(v) => plan_timestamp(v),
            RawPlan::Bytes(b) => serde_json::from_slice::<Value>(b)
                .ok()
                .and_then(|v| plan_timestamp(&v)),
            RawPlan::Text(_) => None,
        }
        .unwrap_or(now);
        self.ingest_at(raw, cloud, environment, generated_at)
    }

    fn changes_of(&self, raw: &RawPlan, cloud: &Cloud) -> Result<Vec<ResourceChange>> {
        match raw {
            RawPlan::Structured(value) => self.normalize_value(value, cloud),
            RawPlan::Bytes(bytes) => {
                let value: Value = serde_json::from_slice(bytes)
                    .map_err(|e| DriftError::malformed(format!("plan is not valid JSON: {e}")))?;
                self.normalize_value(&value, cloud)
            }
            RawPlan::Text(text) => parse_text_plan(text),
        }
    }

    fn normalize_value(&self, value: &Value, cloud: &Cloud) -> Result<Vec<ResourceChange>> {
        let normalizer = self.normalizer_for(cloud);
        let changes = normalizer.normalize(value)?;
        debug!(
            normalizer = normalizer.name(),
            cloud = %cloud,
            changes = changes.len(),
            "plan normalized"
        );
        Ok(changes)
    }
}

/// Ingest with the default registry.
pub fn ingest(raw: &RawPlan, cloud: Cloud, environment: Environment) -> Result<ChangeDocument> {
    NormalizerRegistry::default().ingest(raw, cloud, environment)
}

fn plan_timestamp(plan: &Value) -> Option<DateTime<Utc>> {
    plan.get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_model::Action;
    use serde_json::json;

    fn prod() -> Environment {
        Environment::new("prod").unwrap()
    }

    #[test]
    fn bytes_that_are_not_json_are_malformed() {
        let raw = RawPlan::Bytes(b"Error: provider crashed".to_vec());
        let err = ingest(&raw, Cloud::Aws, prod()).unwrap_err();
        assert!(matches!(err, DriftError::MalformedDocument { .. }));
    }

    #[test]
    fn plan_timestamp_is_used() {
        let raw = RawPlan::Structured(json!({
            "timestamp": "2024-05-01T12:00:00Z",
            "resource_changes": []
        }));
        let doc = ingest(&raw, Cloud::Aws, prod()).unwrap();
        assert_eq!(doc.generated_at().to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn duplicate_addresses_fail() {
        let entry = json!({
            "address": "aws_vpc.main",
            "type": "aws_vpc",
            "change": { "actions": ["update"], "before": {"cidr": "a"}, "after": {"cidr": "b"} }
        });
        let raw = RawPlan::Structured(json!({ "resource_changes": [entry.clone(), entry] }));
        let err = ingest(&raw, Cloud::Aws, prod()).unwrap_err();
        assert!(matches!(
            err,
            DriftError::DuplicateResource { ref address } if address == "aws_vpc.main"
        ));
    }

    struct FixedNormalizer;

    impl PlanNormalizer for FixedNormalizer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn normalize(&self, _plan: &Value) -> Result<Vec<ResourceChange>> {
            Ok(vec![ResourceChange::new(
                "azurerm_resource_group.rg",
                "azurerm_resource_group",
                Action::Create,
                Vec::new(),
            )?])
        }
    }

    #[test]
    fn registered_normalizer_is_selected_by_cloud() {
        let azure = Cloud::Other("azure".into());
        let mut registry = NormalizerRegistry::default();
        registry.register(azure.clone(), Arc::new(FixedNormalizer));

        let doc = registry
            .ingest(&RawPlan::Structured(json!({})), azure, prod())
            .unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(
            doc.get("azurerm_resource_group.rg").unwrap().action(),
            Action::Create
        );
    }
}
