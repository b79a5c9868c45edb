//! Shared test fixtures: a scriptable in-memory provider and graph helpers.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};
use crate::graph::ResourceGraph;
use crate::provider::{
    CreateResponse, DiffChanges, Provider, ProviderGateway, ProviderRegistry, ReadResponse,
    RetryPolicy,
};
use crate::resource::{PropertyMap, PropertyValue, ResourceRegistration, ResourceState, Urn, diff_keys};
use crate::state::Checkpoint;

/// Type token served by [`FakeProvider`].
pub const FAKE_TYPE: &str = "fake:index:Thing";

/// URN of a top-level fake resource in the `dev` stack of project `test`.
pub fn fake_urn(name: &str) -> Urn {
    Urn::new("dev", "test", None, FAKE_TYPE, name)
}

/// Registration of a fake resource.
pub fn thing(name: &str) -> ResourceRegistration {
    ResourceRegistration::new(FAKE_TYPE, name)
}

#[derive(Default)]
struct FakeState {
    events: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    counter: AtomicUsize,
}

/// Provider that records every call and fails or stalls on request.
///
/// Changing the `region` input requires a replacement; any other change is
/// an in-place update. Physical IDs are `<name>-<n>`.
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes create and update calls for `name` fail terminally.
    pub fn failing(self, name: &str) -> Self {
        self.state.failing.lock().unwrap().insert(name.to_string());
        self
    }

    /// Makes every call for `name` take `delay`.
    pub fn with_delay(self, name: &str, delay: Duration) -> Self {
        self.state.delays.lock().unwrap().insert(name.to_string(), delay);
        self
    }

    /// Completed calls as `<operation>:<name>`, in completion order.
    pub fn events(&self) -> Vec<String> {
        self.state.events.lock().unwrap().clone()
    }

    /// Position of an event, panicking if it never happened.
    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event {event} not recorded in {:?}", self.events()))
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.state.max_running.load(Ordering::SeqCst)
    }

    async fn call(&self, operation: &str, urn: &Urn) -> ProviderResult<()> {
        let now = self.state.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_running.fetch_max(now, Ordering::SeqCst);

        let delay = self.state.delays.lock().unwrap().get(urn.name()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.state.running.fetch_sub(1, Ordering::SeqCst);
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("{operation}:{}", urn.name()));

        let fails = matches!(operation, "create" | "update")
            && self.state.failing.lock().unwrap().contains(urn.name());
        if fails {
            return Err(ProviderError::terminal(format!("injected failure for {}", urn.name())));
        }
        Ok(())
    }

    fn outputs(id: &str, inputs: &PropertyMap) -> PropertyMap {
        let mut outputs = inputs.clone();
        outputs.insert("arn".into(), format!("arn:fake:{id}").into());
        outputs
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn diff(
        &self,
        _urn: &Urn,
        _id: &str,
        old: &PropertyMap,
        new: &PropertyMap,
    ) -> ProviderResult<DiffChanges> {
        let keys = diff_keys(old, new);
        Ok(if keys.is_empty() {
            DiffChanges::None
        } else if keys.iter().any(|k| k == "region") {
            DiffChanges::Replace {
                keys: vec!["region".into()],
            }
        } else {
            DiffChanges::Update { keys }
        })
    }

    async fn create(&self, urn: &Urn, inputs: &PropertyMap) -> ProviderResult<CreateResponse> {
        self.call("create", urn).await?;
        let n = self.state.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{n}", urn.name());
        Ok(CreateResponse {
            outputs: Self::outputs(&id, inputs),
            id,
        })
    }

    async fn read(&self, urn: &Urn, id: &str, inputs: &PropertyMap) -> ProviderResult<ReadResponse> {
        self.call("read", urn).await?;
        Ok(ReadResponse {
            id: id.to_string(),
            outputs: Self::outputs(id, inputs),
        })
    }

    async fn update(
        &self,
        urn: &Urn,
        id: &str,
        _old: &PropertyMap,
        new: &PropertyMap,
    ) -> ProviderResult<PropertyMap> {
        self.call("update", urn).await?;
        Ok(Self::outputs(id, new))
    }

    async fn delete(&self, urn: &Urn, _id: &str, _inputs: &PropertyMap) -> ProviderResult<()> {
        self.call("delete", urn).await
    }
}

/// Gateway serving only the fake provider, without retries.
pub fn gateway_with(provider: FakeProvider) -> ProviderGateway {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(provider));
    ProviderGateway::new(registry)
        .with_retry(RetryPolicy::none())
        .with_step_timeout(Duration::from_secs(5))
}

/// A checkpoint recording every resource of `graph` as deployed, with IDs
/// `<name>-id` and references resolved.
pub fn recorded_checkpoint(graph: &ResourceGraph) -> Checkpoint {
    let mut checkpoint = Checkpoint::new(graph.stack(), graph.project());

    for desired in graph.resources() {
        let lookup = |urn: &Urn, property: Option<&str>| {
            let state = checkpoint.get(urn)?;
            match property {
                None => state.id.clone().map(PropertyValue::String),
                Some(p) => state.output(p).cloned(),
            }
        };
        let inputs: PropertyMap = desired
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve_with(&lookup)))
            .collect();

        let (id, outputs) = if desired.custom {
            let id = format!("{}-id", desired.urn.name());
            let outputs = FakeProvider::outputs(&id, &inputs);
            (Some(id), outputs)
        } else {
            (None, inputs.clone())
        };

        let state = ResourceState::from_desired(desired, id, inputs, outputs, None);
        checkpoint.upsert(state);
    }

    checkpoint
}
