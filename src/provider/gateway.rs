//! Provider calls with retry, backoff and per-call timeouts.
//!
//! Every provider call made by the engine goes through the gateway. Transient
//! failures are retried with exponential backoff; terminal failures return
//! immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult, Result};
use crate::planner::{Recheck, Step, StepOp};
use crate::resource::{PropertyMap, ResourceState, Urn, apply_ignore_changes, diff_keys};

use super::interface::{DiffChanges, Provider};
use super::registry::ProviderRegistry;

/// Default number of attempts per provider call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-call timeout in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for any delay.
    pub max_backoff: Duration,
    /// Growth factor between delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based):
    /// `initial * multiplier^(attempt - 1)`, capped at `max_backoff`.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// What a step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Physical ID after the step, if any.
    pub id: Option<String>,
    /// Resolved inputs the step ran with.
    pub inputs: PropertyMap,
    /// Outputs after the step.
    pub outputs: PropertyMap,
    /// Provider attempts made, 0 when no provider was called.
    pub attempts: u32,
    /// The step replaced the resource but could not delete the old one.
    pub superseded: bool,
}

/// Routes provider calls and applies the retry policy.
#[derive(Debug, Clone)]
pub struct ProviderGateway {
    /// Provider lookup.
    registry: Arc<ProviderRegistry>,
    /// Retry settings.
    retry: RetryPolicy,
    /// Timeout for a single provider call.
    step_timeout: Duration,
}

impl ProviderGateway {
    /// Creates a gateway with default retry and timeout settings.
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            retry: RetryPolicy::default(),
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// The provider registry.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs `call` until it succeeds, fails terminally, or runs out of
    /// attempts. Returns the value and the number of attempts made.
    async fn call<T, F, Fut>(&self, urn: &Urn, operation: &str, call: F) -> ProviderResult<(T, u32)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::time::timeout(self.step_timeout, call())
                .await
                .unwrap_or(Err(ProviderError::Timeout {
                    secs: self.step_timeout.as_secs(),
                }));

            match result {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(ProviderError::RetriesExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.retry.backoff_for(attempt);
                    warn!(
                        urn = %urn,
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Asks the provider how a recorded resource would change.
    ///
    /// # Errors
    ///
    /// Returns an error if no provider serves the type or the provider call
    /// fails.
    pub async fn diff(
        &self,
        old: &ResourceState,
        type_token: &str,
        new_inputs: &PropertyMap,
    ) -> Result<DiffChanges> {
        let provider = self.registry.get(type_token)?;
        Ok(self.provider_diff(provider.as_ref(), old, new_inputs).await?)
    }

    async fn provider_diff(
        &self,
        provider: &dyn Provider,
        old: &ResourceState,
        new_inputs: &PropertyMap,
    ) -> ProviderResult<DiffChanges> {
        let id = old.id.as_deref().unwrap_or_default();
        let (changes, _) = self
            .call(&old.urn, "diff", || {
                provider.diff(&old.urn, id, &old.inputs, new_inputs)
            })
            .await?;
        Ok(changes)
    }

    /// Performs the provider work for one step.
    ///
    /// `inputs` are the step's resolved inputs; they are ignored for deletes,
    /// which use the recorded inputs.
    ///
    /// # Errors
    ///
    /// Returns the provider failure, or a terminal error when the step lacks
    /// the state its operation needs.
    pub async fn execute(&self, step: &Step, inputs: PropertyMap) -> ProviderResult<StepOutcome> {
        match step.op {
            StepOp::Same => {
                let old = Self::require_old(step)?;
                Ok(StepOutcome {
                    id: old.id.clone(),
                    inputs,
                    outputs: old.outputs.clone(),
                    ..StepOutcome::default()
                })
            }
            StepOp::Create | StepOp::Replace => self.create(step, inputs).await,
            StepOp::Update => self.update(step, inputs).await,
            StepOp::Read => self.read(step, inputs).await,
            StepOp::Delete | StepOp::DeleteReplaced => self.delete(step).await,
        }
    }

    fn require_old(step: &Step) -> ProviderResult<&ResourceState> {
        step.old.as_ref().ok_or_else(|| {
            ProviderError::terminal(format!("no recorded state for {}", step.urn))
        })
    }

    fn provider_for(&self, step: &Step) -> ProviderResult<Arc<dyn Provider>> {
        self.registry
            .get(&step.type_token)
            .map_err(|e| ProviderError::terminal(e.to_string()))
    }

    async fn create(&self, step: &Step, inputs: PropertyMap) -> ProviderResult<StepOutcome> {
        if !step.is_custom() {
            return Ok(StepOutcome {
                id: None,
                outputs: inputs.clone(),
                inputs,
                ..StepOutcome::default()
            });
        }

        let provider = self.provider_for(step)?;
        let (response, attempts) = self
            .call(&step.urn, "create", || provider.create(&step.urn, &inputs))
            .await?;
        debug!(urn = %step.urn, id = %response.id, "Created resource");

        Ok(StepOutcome {
            id: Some(response.id),
            inputs,
            outputs: response.outputs,
            attempts,
            superseded: false,
        })
    }

    async fn update(&self, step: &Step, inputs: PropertyMap) -> ProviderResult<StepOutcome> {
        let old = Self::require_old(step)?;
        if !step.is_custom() {
            return Ok(StepOutcome {
                id: old.id.clone(),
                outputs: inputs.clone(),
                inputs,
                ..StepOutcome::default()
            });
        }
        match step.recheck {
            Some(recheck) => self.settle(step, old, inputs, recheck).await,
            None => self.update_in_place(step, old, inputs).await,
        }
    }

    /// Diffs a provisional update again now that its inputs are resolved.
    async fn settle(
        &self,
        step: &Step,
        old: &ResourceState,
        inputs: PropertyMap,
        recheck: Recheck,
    ) -> ProviderResult<StepOutcome> {
        let desired = step.new.as_ref().ok_or_else(|| {
            ProviderError::terminal(format!("no desired state for {}", step.urn))
        })?;
        let mut compared = inputs.clone();
        apply_ignore_changes(&mut compared, &old.inputs, &desired.options.ignore_changes);

        let changed = diff_keys(&old.inputs, &compared);
        let changes = if changed.is_empty() {
            DiffChanges::None
        } else if changed
            .iter()
            .any(|k| desired.options.replace_on_changes.contains(k))
        {
            DiffChanges::Replace { keys: changed }
        } else {
            let provider = self.provider_for(step)?;
            self.provider_diff(provider.as_ref(), old, &compared).await?
        };
        debug!(urn = %step.urn, ?changes, "Settled step with resolved inputs");

        match changes {
            DiffChanges::None => Ok(StepOutcome {
                id: old.id.clone(),
                inputs: old.inputs.clone(),
                outputs: old.outputs.clone(),
                ..StepOutcome::default()
            }),
            DiffChanges::Update { .. } => self.update_in_place(step, old, inputs).await,
            DiffChanges::Replace { keys } if !recheck.allow_replace => {
                Err(ProviderError::terminal(format!(
                    "{} is protected and cannot be replaced (changed: {})",
                    step.urn,
                    keys.join(", ")
                )))
            }
            DiffChanges::Replace { .. } => self.replace_in_step(step, old, inputs).await,
        }
    }

    /// Creates the replacement, then deletes the old resource unless the
    /// replacement took over its physical ID.
    async fn replace_in_step(
        &self,
        step: &Step,
        old: &ResourceState,
        inputs: PropertyMap,
    ) -> ProviderResult<StepOutcome> {
        let mut outcome = self.create(step, inputs).await?;
        if outcome.id.is_none() || outcome.id == old.id {
            return Ok(outcome);
        }

        match self.delete_recorded(step, old).await {
            Ok(attempts) => outcome.attempts += attempts,
            Err(e) => {
                warn!(urn = %step.urn, error = %e, "Replaced resource not deleted, keeping it for the next run");
                outcome.superseded = true;
            }
        }
        Ok(outcome)
    }

    async fn update_in_place(
        &self,
        step: &Step,
        old: &ResourceState,
        inputs: PropertyMap,
    ) -> ProviderResult<StepOutcome> {
        let id = old
            .id
            .as_deref()
            .ok_or_else(|| ProviderError::terminal(format!("{} has no physical id", step.urn)))?;
        let provider = self.provider_for(step)?;
        let (changed, attempts) = self
            .call(&step.urn, "update", || {
                provider.update(&step.urn, id, &old.inputs, &inputs)
            })
            .await?;
        // Outputs an update does not report keep their recorded values.
        let mut outputs = old.outputs.clone();
        outputs.extend(changed);

        Ok(StepOutcome {
            id: Some(id.to_string()),
            inputs,
            outputs,
            attempts,
            superseded: false,
        })
    }

    async fn read(&self, step: &Step, inputs: PropertyMap) -> ProviderResult<StepOutcome> {
        if !step.is_custom() {
            return self.create(step, inputs).await;
        }

        let import_id = step
            .new
            .as_ref()
            .and_then(|r| r.options.import_id.clone())
            .ok_or_else(|| ProviderError::terminal(format!("{} has no import id", step.urn)))?;
        let provider = self.provider_for(step)?;
        let (response, attempts) = self
            .call(&step.urn, "read", || {
                provider.read(&step.urn, &import_id, &inputs)
            })
            .await?;

        Ok(StepOutcome {
            id: Some(response.id),
            inputs,
            outputs: response.outputs,
            attempts,
            superseded: false,
        })
    }

    async fn delete(&self, step: &Step) -> ProviderResult<StepOutcome> {
        let old = Self::require_old(step)?;
        let attempts = self.delete_recorded(step, old).await?;
        Ok(StepOutcome {
            attempts,
            ..StepOutcome::default()
        })
    }

    /// Deletes the physical resource behind a recorded entry and returns the
    /// attempts made.
    async fn delete_recorded(&self, step: &Step, old: &ResourceState) -> ProviderResult<u32> {
        let urn = &step.urn;
        let skip = !old.custom || old.retain_on_delete || old.id.is_none();
        let Some(id) = old.id.as_deref().filter(|_| !skip) else {
            debug!(urn = %urn, "Dropping resource from state without provider delete");
            return Ok(0);
        };

        let provider = self.provider_for(step)?;
        match self
            .call(urn, "delete", || provider.delete(urn, id, &old.inputs))
            .await
        {
            Ok(((), attempts)) => Ok(attempts),
            Err(ProviderError::NotFound { .. }) => {
                debug!(urn = %urn, id, "Resource already gone");
                Ok(1)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::interface::{CreateResponse, MockProvider};
    use crate::resource::{DesiredResource, ResourceOptions};

    fn urn() -> Urn {
        Urn::new("dev", "test", None, "mock:index:Thing", "thing")
    }

    fn gateway(mock: MockProvider, retry: RetryPolicy) -> ProviderGateway {
        let mut registry = ProviderRegistry::new();
        registry.register_as("mock", Arc::new(mock));
        ProviderGateway::new(registry)
            .with_retry(retry)
            .with_step_timeout(Duration::from_secs(5))
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn desired() -> DesiredResource {
        DesiredResource {
            urn: urn(),
            type_token: "mock:index:Thing".into(),
            parent: None,
            custom: true,
            inputs: PropertyMap::new(),
            dependencies: Vec::new(),
            options: ResourceOptions::default(),
        }
    }

    fn recorded() -> ResourceState {
        ResourceState::from_desired(
            &desired(),
            Some("thing-1".into()),
            PropertyMap::new(),
            PropertyMap::new(),
            None,
        )
    }

    fn step(op: StepOp) -> Step {
        let (old, new) = match op {
            StepOp::Create | StepOp::Read => (None, Some(desired())),
            StepOp::Delete | StepOp::DeleteReplaced => (Some(recorded()), None),
            _ => (Some(recorded()), Some(desired())),
        };
        Step::new(op, urn(), "mock:index:Thing", old, new)
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let mut mock = MockProvider::new();
        let mut calls = 0;
        mock.expect_create().times(3).returning(move |_, _| {
            calls += 1;
            if calls < 3 {
                Err(ProviderError::transient("throttled"))
            } else {
                Ok(CreateResponse {
                    id: "thing-1".into(),
                    outputs: PropertyMap::new(),
                })
            }
        });

        let outcome = gateway(mock, fast_retry(3))
            .execute(&step(StepOp::Create), PropertyMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.id.as_deref(), Some("thing-1"));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let mut mock = MockProvider::new();
        mock.expect_create()
            .times(1)
            .returning(|_, _| Err(ProviderError::terminal("invalid input")));

        let err = gateway(mock, fast_retry(5))
            .execute(&step(StepOp::Create), PropertyMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::terminal("invalid input"));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut mock = MockProvider::new();
        mock.expect_create()
            .times(2)
            .returning(|_, _| Err(ProviderError::transient("throttled")));

        let err = gateway(mock, fast_retry(2))
            .execute(&step(StepOp::Create), PropertyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let mut mock = MockProvider::new();
        mock.expect_delete()
            .times(1)
            .returning(|_, id, _| Err(ProviderError::NotFound { id: id.to_string() }));

        let outcome = gateway(mock, fast_retry(3))
            .execute(&step(StepOp::Delete), PropertyMap::new())
            .await
            .unwrap();
        assert!(outcome.id.is_none());
    }

    #[tokio::test]
    async fn test_retain_on_delete_skips_provider() {
        let mut mock = MockProvider::new();
        mock.expect_delete().never();

        let mut s = step(StepOp::Delete);
        if let Some(old) = s.old.as_mut() {
            old.retain_on_delete = true;
        }
        let outcome = gateway(mock, fast_retry(3))
            .execute(&s, PropertyMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn test_same_reuses_outputs_without_provider() {
        let mock = MockProvider::new();
        let mut s = step(StepOp::Same);
        if let Some(old) = s.old.as_mut() {
            old.outputs.insert("arn".into(), "arn:1".into());
        }

        let outcome = gateway(mock, fast_retry(3))
            .execute(&s, PropertyMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.id.as_deref(), Some("thing-1"));
        assert_eq!(outcome.outputs.get("arn"), Some(&"arn:1".into()));
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn test_update_keeps_unreported_outputs() {
        let mut mock = MockProvider::new();
        mock.expect_update().times(1).returning(|_, _, _, _| {
            let mut outputs = PropertyMap::new();
            outputs.insert("size".into(), "2".into());
            Ok(outputs)
        });
        let mut s = step(StepOp::Update);
        if let Some(old) = s.old.as_mut() {
            old.outputs.insert("arn".into(), "arn:1".into());
            old.outputs.insert("size".into(), "1".into());
        }

        let outcome = gateway(mock, fast_retry(3))
            .execute(&s, PropertyMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.outputs.get("arn"), Some(&"arn:1".into()));
        assert_eq!(outcome.outputs.get("size"), Some(&"2".into()));
        assert_eq!(outcome.attempts, 1);
    }

    fn provisional(allow_replace: bool) -> Step {
        let mut s = step(StepOp::Update);
        s.recheck = Some(Recheck { allow_replace });
        if let Some(old) = s.old.as_mut() {
            old.inputs.insert("region".into(), "eu".into());
            old.outputs.insert("arn".into(), "arn:1".into());
        }
        s
    }

    fn region(value: &str) -> PropertyMap {
        let mut inputs = PropertyMap::new();
        inputs.insert("region".into(), value.into());
        inputs
    }

    #[tokio::test]
    async fn test_settled_step_without_changes_skips_provider() {
        let mut mock = MockProvider::new();
        mock.expect_diff().never();
        mock.expect_update().never();

        let outcome = gateway(mock, fast_retry(3))
            .execute(&provisional(false), region("eu"))
            .await
            .unwrap();
        assert_eq!(outcome.id.as_deref(), Some("thing-1"));
        assert_eq!(outcome.outputs.get("arn"), Some(&"arn:1".into()));
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn test_settled_replacement_of_protected_resource_fails() {
        let mut mock = MockProvider::new();
        mock.expect_diff().times(1).returning(|_, _, _, _| {
            Ok(DiffChanges::Replace {
                keys: vec!["region".into()],
            })
        });
        mock.expect_create().never();

        let err = gateway(mock, fast_retry(3))
            .execute(&provisional(false), region("us"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("protected"));
    }

    #[tokio::test]
    async fn test_settled_replacement_creates_then_deletes() {
        let mut mock = MockProvider::new();
        mock.expect_diff().times(1).returning(|_, _, _, _| {
            Ok(DiffChanges::Replace {
                keys: vec!["region".into()],
            })
        });
        mock.expect_create().times(1).returning(|_, _| {
            Ok(CreateResponse {
                id: "thing-2".into(),
                outputs: PropertyMap::new(),
            })
        });
        mock.expect_delete()
            .withf(|_, id, _| id.to_string() == "thing-1")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let outcome = gateway(mock, fast_retry(3))
            .execute(&provisional(true), region("us"))
            .await
            .unwrap();
        assert_eq!(outcome.id.as_deref(), Some("thing-2"));
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.superseded);
    }

    #[tokio::test]
    async fn test_settled_replacement_keeps_undeletable_old_resource() {
        let mut mock = MockProvider::new();
        mock.expect_diff().returning(|_, _, _, _| {
            Ok(DiffChanges::Replace {
                keys: vec!["region".into()],
            })
        });
        mock.expect_create().returning(|_, _| {
            Ok(CreateResponse {
                id: "thing-2".into(),
                outputs: PropertyMap::new(),
            })
        });
        mock.expect_delete()
            .returning(|_, _, _| Err(ProviderError::terminal("in use")));

        let outcome = gateway(mock, fast_retry(3))
            .execute(&provisional(true), region("us"))
            .await
            .unwrap();
        assert_eq!(outcome.id.as_deref(), Some("thing-2"));
        assert!(outcome.superseded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        struct Slow;

        #[async_trait::async_trait]
        impl Provider for Slow {
            fn name(&self) -> &'static str {
                "mock"
            }
            async fn create(&self, _: &Urn, _: &PropertyMap) -> ProviderResult<CreateResponse> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(ProviderError::terminal("unreachable"))
            }
            async fn read(
                &self,
                _: &Urn,
                _: &str,
                _: &PropertyMap,
            ) -> ProviderResult<crate::provider::ReadResponse> {
                Err(ProviderError::terminal("unsupported"))
            }
            async fn update(
                &self,
                _: &Urn,
                _: &str,
                _: &PropertyMap,
                _: &PropertyMap,
            ) -> ProviderResult<PropertyMap> {
                Err(ProviderError::terminal("unsupported"))
            }
            async fn delete(&self, _: &Urn, _: &str, _: &PropertyMap) -> ProviderResult<()> {
                Ok(())
            }
        }

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Slow));
        let gateway = ProviderGateway::new(registry)
            .with_retry(fast_retry(2))
            .with_step_timeout(Duration::from_secs(1));

        let err = gateway
            .execute(&step(StepOp::Create), PropertyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_component_never_calls_provider() {
        let registry = ProviderRegistry::new();
        let gateway = ProviderGateway::new(registry);

        let mut s = step(StepOp::Create);
        if let Some(new) = s.new.as_mut() {
            new.custom = false;
        }
        let mut inputs = PropertyMap::new();
        inputs.insert("title".into(), "home".into());

        let outcome = gateway.execute(&s, inputs.clone()).await.unwrap();
        assert!(outcome.id.is_none());
        assert_eq!(outcome.outputs, inputs);
    }
}
