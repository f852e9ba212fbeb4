//! Saga definitions: fluent builder over steps with forward and
//! compensation bodies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{CompensationPolicy, CompensationRetryConfig, ExecutionPlan};
use crate::services::dag_compiler::{self, GraphNode};

/// Context handed to step actions and compensations.
#[derive(Clone)]
pub struct StepContext {
    pub saga_id: String,
    pub step_id: String,
    /// Results of completed predecessor steps.
    pub results: HashMap<String, serde_json::Value>,
    pub cancellation: CancellationToken,
}

/// A step body: async function from context to a JSON result.
pub type StepFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, EngineResult<serde_json::Value>> + Send + Sync>;

/// One step of a saga: a forward action, an optional compensation, and its
/// place in the dependency DAG.
#[derive(Clone)]
pub struct SagaStep {
    pub id: String,
    pub deps: Vec<String>,
    pub timeout: Option<Duration>,
    /// Per-step policy override; `None` inherits the saga policy.
    pub policy: Option<CompensationPolicy>,
    pub action: StepFn,
    pub compensation: Option<StepFn>,
}

impl GraphNode for SagaStep {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_deps(&self) -> &[String] {
        &self.deps
    }
}

/// Fluent step configuration.
pub struct Step {
    step: SagaStep,
}

impl Step {
    pub fn new<F>(id: impl Into<String>, action: F) -> Self
    where
        F: Fn(StepContext) -> BoxFuture<'static, EngineResult<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            step: SagaStep {
                id: id.into(),
                deps: Vec::new(),
                timeout: None,
                policy: None,
                action: Arc::new(action),
                compensation: None,
            },
        }
    }

    pub fn compensation<F>(mut self, compensation: F) -> Self
    where
        F: Fn(StepContext) -> BoxFuture<'static, EngineResult<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        self.step.compensation = Some(Arc::new(compensation));
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.step.timeout = Some(timeout);
        self
    }

    pub fn policy(mut self, policy: CompensationPolicy) -> Self {
        self.step.policy = Some(policy);
        self
    }
}

/// A built saga definition. Cycles are rejected at build time; the compiled
/// plan is cached for forward and reverse traversal.
#[derive(Clone)]
pub struct SagaDefinition {
    name: String,
    policy: CompensationPolicy,
    retry: CompensationRetryConfig,
    step_timeout: Option<Duration>,
    steps: HashMap<String, SagaStep>,
    plan: ExecutionPlan,
}

impl std::fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("retry", &self.retry)
            .field("step_timeout", &self.step_timeout)
            .finish()
    }
}

impl SagaDefinition {
    pub fn builder(name: impl Into<String>) -> SagaBuilder {
        SagaBuilder {
            name: name.into(),
            steps: Vec::new(),
            policy: CompensationPolicy::default(),
            retry: CompensationRetryConfig::default(),
            step_timeout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> CompensationPolicy {
        self.policy
    }

    pub fn retry(&self) -> CompensationRetryConfig {
        self.retry
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn step(&self, id: &str) -> Option<&SagaStep> {
        self.steps.get(id)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Per-step override, falling back to the saga-level policy.
    pub fn effective_policy(&self, step_id: &str) -> CompensationPolicy {
        self.steps
            .get(step_id)
            .and_then(|s| s.policy)
            .unwrap_or(self.policy)
    }

    /// Effective per-invocation timeout for a step.
    pub fn step_timeout(&self, step_id: &str) -> Option<Duration> {
        self.steps
            .get(step_id)
            .and_then(|s| s.timeout)
            .or(self.step_timeout)
    }
}

/// Builder for [`SagaDefinition`].
pub struct SagaBuilder {
    name: String,
    steps: Vec<SagaStep>,
    policy: CompensationPolicy,
    retry: CompensationRetryConfig,
    step_timeout: Option<Duration>,
}

impl SagaBuilder {
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step.step);
        self
    }

    pub fn policy(mut self, policy: CompensationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry(mut self, retry: CompensationRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Validates the step DAG (duplicates, unknown deps, cycles) and builds
    /// the definition.
    pub fn build(self) -> EngineResult<SagaDefinition> {
        if self.name.is_empty() {
            return Err(EngineError::Configuration("saga name cannot be empty".into()));
        }
        let plan = dag_compiler::compile(&self.steps)?;
        let steps = self
            .steps
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        Ok(SagaDefinition {
            name: self.name,
            policy: self.policy,
            retry: self.retry,
            step_timeout: self.step_timeout,
            steps,
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn noop(_: StepContext) -> BoxFuture<'static, EngineResult<serde_json::Value>> {
        async { Ok(serde_json::Value::Null) }.boxed()
    }

    #[test]
    fn test_build_layers_steps() {
        let def = SagaDefinition::builder("order")
            .step(Step::new("reserve", noop).compensation(noop))
            .step(Step::new("charge", noop).depends_on(["reserve"]))
            .step(Step::new("ship", noop).depends_on(["charge"]))
            .build()
            .unwrap();

        assert_eq!(def.plan().layer_count(), 3);
        assert_eq!(def.step_count(), 3);
        assert!(def.step("reserve").unwrap().compensation.is_some());
        assert!(def.step("charge").unwrap().compensation.is_none());
    }

    #[test]
    fn test_cycles_rejected_at_build() {
        let err = SagaDefinition::builder("broken")
            .step(Step::new("a", noop).depends_on(["b"]))
            .step(Step::new("b", noop).depends_on(["a"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency(_)));
    }

    #[test]
    fn test_policy_override() {
        let def = SagaDefinition::builder("order")
            .policy(CompensationPolicy::Auto)
            .step(Step::new("a", noop))
            .step(Step::new("b", noop).policy(CompensationPolicy::Skip))
            .build()
            .unwrap();

        assert_eq!(def.effective_policy("a"), CompensationPolicy::Auto);
        assert_eq!(def.effective_policy("b"), CompensationPolicy::Skip);
    }

    #[test]
    fn test_step_timeout_fallback() {
        let def = SagaDefinition::builder("order")
            .step_timeout(Duration::from_secs(5))
            .step(Step::new("a", noop))
            .step(Step::new("b", noop).timeout(Duration::from_secs(1)))
            .build()
            .unwrap();

        assert_eq!(def.step_timeout("a"), Some(Duration::from_secs(5)));
        assert_eq!(def.step_timeout("b"), Some(Duration::from_secs(1)));
    }
}
