//! Plan executor.
//!
//! Drives the batches of an [`ExecutionPlan`] against a [`Provisioner`].
//! Members of a batch run concurrently; a batch is a barrier, so the next one
//! starts only after every member of the current one is terminal in the
//! output store.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::engine::{ConfigSource, Provisioner};
use crate::error::{ProvisionError, Result, StackError};
use crate::outputs::{OutputStore, Outputs};
use crate::resource::{
    InputValue, OutputRef, ResolvedInputs, ResourceDescriptor, ValueLookup, output_refs,
};

use super::plan::ExecutionPlan;

/// Default per-resource provisioning timeout in seconds.
pub const DEFAULT_RESOURCE_TIMEOUT_SECS: u64 = 600;

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Timeout applied to resources without their own.
    pub resource_timeout: Duration,
    /// Upper bound on concurrent provisioning calls within a batch.
    pub max_parallel: Option<usize>,
    /// Keep provisioning independent resources after a failure.
    pub continue_on_error: bool,
}

/// Executes plans against the provisioning engine.
pub struct Executor {
    provisioner: Arc<dyn Provisioner>,
    config: Arc<dyn ConfigSource>,
    store: Arc<OutputStore>,
    options: ExecutionOptions,
}

/// A resource whose provisioning failed.
#[derive(Debug)]
pub struct ResourceFailure {
    /// Failed resource.
    pub resource: String,
    /// What went wrong.
    pub error: StackError,
}

/// A resource skipped because something it depends on failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedResource {
    /// Skipped resource.
    pub resource: String,
    /// Root failure that poisoned it.
    pub upstream: String,
}

/// Outcome of a run.
#[derive(Debug, Default)]
pub struct RunResult {
    /// Outputs of every provisioned resource.
    pub outputs: BTreeMap<String, Outputs>,
    /// Root failures, in the order they were observed.
    pub errors: Vec<ResourceFailure>,
    /// Resources never provisioned because an upstream failed.
    pub skipped: Vec<SkippedResource>,
    /// Independent resources left unprovisioned because the run aborted.
    pub not_started: Vec<String>,
}

/// Everything a provisioning task needs, cloned into each task.
#[derive(Clone)]
struct ResourceTask {
    provisioner: Arc<dyn Provisioner>,
    config: Arc<dyn ConfigSource>,
    store: Arc<OutputStore>,
    semaphore: Option<Arc<Semaphore>>,
    default_timeout: Duration,
}

/// Values available while evaluating one resource's inputs.
struct RunLookup<'a> {
    outputs: &'a HashMap<OutputRef, Value>,
    config: &'a dyn ConfigSource,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            resource_timeout: Duration::from_secs(DEFAULT_RESOURCE_TIMEOUT_SECS),
            max_parallel: None,
            continue_on_error: false,
        }
    }
}

impl ExecutionOptions {
    /// Sets the default resource timeout.
    #[must_use]
    pub const fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.resource_timeout = timeout;
        self
    }

    /// Bounds concurrency within a batch.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

impl RunResult {
    /// Returns true if every planned resource was provisioned.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.skipped.is_empty() && self.not_started.is_empty()
    }

    /// The first failure observed, if any.
    #[must_use]
    pub fn root_failure(&self) -> Option<&ResourceFailure> {
        self.errors.first()
    }

    /// Names of the provisioned resources.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.outputs.keys().map(String::as_str).collect()
    }
}

impl Executor {
    /// Creates an executor with default options and a fresh output store.
    #[must_use]
    pub fn new(provisioner: Arc<dyn Provisioner>, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            provisioner,
            config,
            store: Arc::new(OutputStore::new()),
            options: ExecutionOptions::default(),
        }
    }

    /// Replaces the run options.
    #[must_use]
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares an existing output store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<OutputStore>) -> Self {
        self.store = store;
        self
    }

    /// The output store written during runs.
    #[must_use]
    pub const fn store(&self) -> &Arc<OutputStore> {
        &self.store
    }

    /// Current options.
    #[must_use]
    pub const fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Reads an output after (or during) a run.
    ///
    /// # Errors
    ///
    /// Returns an output error if the owning resource failed, did not report
    /// the field, or is not part of the run.
    pub async fn get_output(&self, resource: &str, field: &str) -> Result<Value> {
        Ok(self.store.get(resource, field).await?)
    }

    /// Evaluates `value` against the outputs recorded in the store.
    ///
    /// Used for stack exports once a run has finished. References to
    /// resources outside the run fail instead of waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced output is unavailable or a config
    /// value or secret is missing.
    pub async fn resolve_value(&self, value: &InputValue) -> Result<Value> {
        let mut outputs = HashMap::new();
        fetch_outputs(&self.store, value, &mut outputs).await?;
        let lookup = RunLookup {
            outputs: &outputs,
            config: self.config.as_ref(),
        };
        value.evaluate(&lookup)
    }

    /// Executes every batch of `plan`.
    ///
    /// Failures are reported in the returned [`RunResult`] rather than as an
    /// error: the run always accounts for every planned resource.
    pub async fn execute(&self, plan: &ExecutionPlan) -> RunResult {
        let mut result = RunResult::default();
        if plan.is_empty() {
            return result;
        }

        info!(
            "Executing plan: {} resources in {} batches (engine: {})",
            plan.resource_count(),
            plan.batches().len(),
            self.provisioner.engine_name()
        );

        // Outputs from an earlier run of the same resources are discarded.
        for descriptor in plan.graph().descriptors() {
            self.store.reset(descriptor.name());
        }

        let task = ResourceTask {
            provisioner: Arc::clone(&self.provisioner),
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            semaphore: self
                .options
                .max_parallel
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            default_timeout: self.options.resource_timeout,
        };

        // Failed or skipped resource -> root failure that caused it.
        let mut poisoned: HashMap<String, String> = HashMap::new();
        let mut next_batch = plan.batches().len();

        for batch in plan.batches() {
            debug!("Starting batch {}: {:?}", batch.index, batch.resources);

            let mut tasks = JoinSet::new();
            let mut launched: Vec<&str> = Vec::new();

            for name in &batch.resources {
                if let Some(root) = Self::poisoned_by(plan, name, &poisoned) {
                    self.skip(name, root, &mut poisoned, &mut result);
                    continue;
                }
                let Some(descriptor) = plan.descriptor(name) else {
                    continue;
                };

                let task = task.clone();
                let descriptor = Arc::clone(descriptor);
                tasks.spawn(async move {
                    let outcome = task.run(&descriptor).await;
                    (descriptor.name().to_string(), outcome)
                });
                launched.push(name);
            }

            let mut reported: HashSet<String> = HashSet::new();
            let mut failures: Vec<ResourceFailure> = Vec::new();

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(outputs))) => {
                        info!("Provisioned {name}");
                        reported.insert(name.clone());
                        result.outputs.insert(name, outputs);
                    }
                    Ok((name, Err(error))) => {
                        error!("Failed to provision {name}: {error}");
                        reported.insert(name.clone());
                        failures.push(ResourceFailure {
                            resource: name,
                            error,
                        });
                    }
                    Err(join_error) => {
                        error!("Provisioning task did not finish: {join_error}");
                    }
                }
            }

            for name in launched.iter().filter(|n| !reported.contains(**n)) {
                let message = "provisioning task panicked";
                self.store.fail(name, message);
                failures.push(ResourceFailure {
                    resource: (*name).to_string(),
                    error: StackError::internal(message),
                });
            }

            failures.sort_by_key(|f| plan.graph().position(&f.resource));
            let batch_failed = !failures.is_empty();
            for failure in failures {
                poisoned.insert(failure.resource.clone(), failure.resource.clone());
                result.errors.push(failure);
            }

            if batch_failed && !self.options.continue_on_error {
                next_batch = batch.index + 1;
                break;
            }
        }

        for batch in plan.batches().iter().skip(next_batch) {
            for name in &batch.resources {
                if let Some(root) = Self::poisoned_by(plan, name, &poisoned) {
                    self.skip(name, root, &mut poisoned, &mut result);
                } else {
                    warn!("Run aborted before {name}");
                    self.store.fail(name, "run aborted");
                    result.not_started.push(name.clone());
                }
            }
        }

        info!(
            "Run finished: {} provisioned, {} failed, {} skipped, {} not started",
            result.outputs.len(),
            result.errors.len(),
            result.skipped.len(),
            result.not_started.len()
        );
        result
    }

    fn poisoned_by(
        plan: &ExecutionPlan,
        name: &str,
        poisoned: &HashMap<String, String>,
    ) -> Option<String> {
        plan.graph()
            .dependencies_of(name)
            .into_iter()
            .find_map(|dep| poisoned.get(dep).cloned())
    }

    fn skip(
        &self,
        name: &str,
        root: String,
        poisoned: &mut HashMap<String, String>,
        result: &mut RunResult,
    ) {
        warn!("Skipping {name}: upstream {root} failed");
        self.store.fail(name, &format!("upstream {root} failed"));
        poisoned.insert(name.to_string(), root.clone());
        result.skipped.push(SkippedResource {
            resource: name.to_string(),
            upstream: root,
        });
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("engine", &self.provisioner.engine_name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ResourceTask {
    /// Provisions one resource and records the outcome in the store.
    async fn run(&self, descriptor: &ResourceDescriptor) -> Result<Outputs> {
        let name = descriptor.name();
        let outcome = self.provision(descriptor).await;
        if let Err(e) = &outcome {
            self.store.fail(name, &e.to_string());
        }
        outcome
    }

    async fn provision(&self, descriptor: &ResourceDescriptor) -> Result<Outputs> {
        let name = descriptor.name();

        let _permit = match &self.semaphore {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| StackError::internal(format!("Semaphore closed: {e}")))?,
            ),
            None => None,
        };

        self.store.begin(name);
        let inputs = self.resolve_inputs(descriptor).await?;
        let shown = Value::Object(inputs.redacted());
        debug!("Provisioning {descriptor} with inputs {shown}");

        let timeout = descriptor.timeout().unwrap_or(self.default_timeout);
        let outputs = tokio::time::timeout(timeout, self.provisioner.provision(descriptor, &inputs))
            .await
            .map_err(|_| ProvisionError::Timeout {
                resource: name.to_string(),
                timeout_secs: timeout.as_secs(),
            })??;

        self.store.complete(name, &outputs)?;
        Ok(outputs)
    }

    /// Waits for every referenced output, then evaluates the inputs.
    async fn resolve_inputs(&self, descriptor: &ResourceDescriptor) -> Result<ResolvedInputs> {
        let mut outputs = HashMap::new();
        for (_, value) in descriptor.inputs() {
            fetch_outputs(&self.store, value, &mut outputs).await?;
        }

        let lookup = RunLookup {
            outputs: &outputs,
            config: self.config.as_ref(),
        };

        let mut resolved = ResolvedInputs::default();
        for (field, value) in descriptor.inputs() {
            resolved
                .values
                .insert(field.clone(), value.evaluate(&lookup)?);
            if value.contains_secret() {
                resolved.secret_fields.push(field.clone());
            }
        }
        Ok(resolved)
    }
}

impl ValueLookup for RunLookup<'_> {
    fn output(&self, reference: &OutputRef) -> Result<Value> {
        self.outputs.get(reference).cloned().ok_or_else(|| {
            StackError::internal(format!("Output {reference} was not fetched before evaluation"))
        })
    }

    fn config(&self, key: &str) -> Result<Value> {
        Ok(self.config.get_config_value(key).map(Value::String)?)
    }

    fn secret(&self, key: &str) -> Result<Value> {
        Ok(self.config.get_secret(key).map(Value::String)?)
    }
}

/// Reads every output `value` references into `outputs`.
async fn fetch_outputs(
    store: &OutputStore,
    value: &InputValue,
    outputs: &mut HashMap<OutputRef, Value>,
) -> Result<()> {
    for reference in output_refs(value) {
        if outputs.contains_key(&reference) {
            continue;
        }
        let resolved = store.get(&reference.resource, &reference.field).await?;
        outputs.insert(reference, resolved);
    }
    Ok(())
}

/// Returns true if `value` is fully known before the run starts.
#[must_use]
pub fn is_static(value: &InputValue) -> bool {
    let mut deferred = false;
    value.walk(&mut |node: &InputValue| {
        if matches!(
            node,
            InputValue::OutputRef(_) | InputValue::Config { .. } | InputValue::Secret(_)
        ) {
            deferred = true;
        }
    });
    !deferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FnProvisioner, MapConfigSource, MockConfigSource};
    use crate::error::{ConfigError, OutputError};
    use crate::outputs::ResourcePhase;
    use crate::planner::plan::plan;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resource(name: &str, deps: &[&str]) -> ResourceDescriptor {
        deps.iter().fold(
            ResourceDescriptor::new("test:Resource", name),
            |descriptor, dep| descriptor.with_input(format!("{dep}Id"), InputValue::output(*dep, "id")),
        )
    }

    /// Records every call and fails the resources named in `failing`.
    fn recording(
        calls: Arc<Mutex<Vec<String>>>,
        failing: &'static [&'static str],
    ) -> Arc<dyn Provisioner> {
        Arc::new(FnProvisioner::new(move |descriptor: ResourceDescriptor, _inputs: ResolvedInputs| {
            let calls = Arc::clone(&calls);
            async move {
                let name = descriptor.name().to_string();
                calls.lock().unwrap().push(name.clone());
                if failing.contains(&name.as_str()) {
                    return Err(ProvisionError::failed(name, "quota exceeded"));
                }
                let mut outputs = Outputs::new();
                outputs.insert(String::from("id"), json!(format!("id-{name}")));
                Ok(outputs)
            }
        }))
    }

    fn executor(provisioner: Arc<dyn Provisioner>) -> Executor {
        Executor::new(provisioner, Arc::new(MapConfigSource::new()))
    }

    #[tokio::test]
    async fn test_outputs_flow_downstream() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor(recording(Arc::clone(&calls), &[]));
        let plan = plan(vec![resource("a", &[]), resource("b", &["a"]), resource("c", &["a", "b"])]).unwrap();

        let result = executor.execute(&plan).await;

        assert!(result.is_success());
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(executor.get_output("c", "id").await.unwrap(), json!("id-c"));
        assert_eq!(executor.get_output("c", "id").await.unwrap(), json!("id-c"));
        assert_eq!(result.succeeded(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor(recording(Arc::clone(&calls), &["b"]));
        let plan = plan(vec![
            resource("a", &[]),
            resource("b", &["a"]),
            resource("c", &["a"]),
            resource("d", &["b"]),
        ])
        .unwrap();

        let result = executor.execute(&plan).await;

        assert!(!result.is_success());
        assert_eq!(result.root_failure().map(|f| f.resource.as_str()), Some("b"));
        assert!(result.outputs.contains_key("c"));
        assert_eq!(
            result.skipped,
            vec![SkippedResource {
                resource: String::from("d"),
                upstream: String::from("b"),
            }]
        );
        assert!(!calls.lock().unwrap().contains(&String::from("d")));
        assert!(matches!(
            executor.store().get("d", "id").await,
            Err(OutputError::UpstreamFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_leaves_independent_resources_not_started() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor(recording(Arc::clone(&calls), &["b"]));
        let plan = plan(vec![
            resource("a", &[]),
            resource("b", &["a"]),
            resource("c", &["a"]),
            resource("d", &["b"]),
            resource("e", &["c"]),
            resource("f", &["d"]),
        ])
        .unwrap();

        let result = executor.execute(&plan).await;

        let skipped: Vec<&str> = result.skipped.iter().map(|s| s.resource.as_str()).collect();
        assert_eq!(skipped, vec!["d", "f"]);
        assert!(result.skipped.iter().all(|s| s.upstream == "b"));
        assert_eq!(result.not_started, vec!["e"]);
        assert!(!calls.lock().unwrap().contains(&String::from("e")));
        assert!(executor.store().get("e", "id").await.is_err());
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_independent_resources() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor(recording(Arc::clone(&calls), &["b"]))
            .with_options(ExecutionOptions::default().with_continue_on_error(true));
        let plan = plan(vec![
            resource("a", &[]),
            resource("b", &["a"]),
            resource("c", &["a"]),
            resource("d", &["b"]),
            resource("e", &["c"]),
        ])
        .unwrap();

        let result = executor.execute(&plan).await;

        assert!(result.outputs.contains_key("e"));
        assert!(result.not_started.is_empty());
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_resource() {
        let provisioner: Arc<dyn Provisioner> =
            Arc::new(FnProvisioner::new(|descriptor: ResourceDescriptor, _inputs: ResolvedInputs| async move {
                if descriptor.name() == "slow" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, ProvisionError>(Outputs::new())
            }));
        let executor = executor(provisioner);
        let plan = plan(vec![
            resource("slow", &[]).with_timeout(Duration::from_millis(50)),
            resource("fast", &[]),
        ])
        .unwrap();

        let result = executor.execute(&plan).await;

        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            result.errors[0].error,
            StackError::Provision(ProvisionError::Timeout { ref resource, .. }) if resource == "slow"
        ));
        assert!(result.outputs.contains_key("fast"));
        assert_eq!(executor.store().phase("slow"), Some(ResourcePhase::Failed));
        assert!(matches!(
            executor.get_output("slow", "id").await,
            Err(StackError::Output(OutputError::UpstreamFailure { ref resource })) if resource == "slow"
        ));
    }

    #[tokio::test]
    async fn test_second_run_replaces_earlier_outputs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provisioner: Arc<dyn Provisioner> = {
            let runs = Arc::clone(&runs);
            let seen = Arc::clone(&seen);
            Arc::new(FnProvisioner::new(move |descriptor: ResourceDescriptor, inputs: ResolvedInputs| {
                let runs = Arc::clone(&runs);
                let seen = Arc::clone(&seen);
                async move {
                    let mut outputs = Outputs::new();
                    if descriptor.name() == "a" {
                        let run = runs.fetch_add(1, Ordering::SeqCst);
                        outputs.insert(String::from("id"), json!(format!("a-run{run}")));
                    } else {
                        seen.lock().unwrap().push(inputs.values["aId"].clone());
                    }
                    Ok::<_, ProvisionError>(outputs)
                }
            }))
        };
        let executor = executor(provisioner);
        let plan = plan(vec![resource("a", &[]), resource("b", &["a"])]).unwrap();

        assert!(executor.execute(&plan).await.is_success());
        let second = executor.execute(&plan).await;

        assert!(second.is_success(), "{:?}", second.errors);
        assert_eq!(*seen.lock().unwrap(), vec![json!("a-run0"), json!("a-run1")]);
        assert_eq!(executor.get_output("a", "id").await.unwrap(), json!("a-run1"));
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let provisioner: Arc<dyn Provisioner> = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            Arc::new(FnProvisioner::new(move |_descriptor: ResourceDescriptor, _inputs: ResolvedInputs| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ProvisionError>(Outputs::new())
                }
            }))
        };
        let executor = executor(provisioner)
            .with_options(ExecutionOptions::default().with_max_parallel(Some(2)));
        let plan = plan((0..6).map(|i| resource(&format!("r{i}"), &[])).collect()).unwrap();

        let result = executor.execute(&plan).await;

        assert!(result.is_success());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_inputs_resolved_with_config_and_secrets() {
        let seen = Arc::new(Mutex::new(None));
        let provisioner: Arc<dyn Provisioner> = {
            let seen = Arc::clone(&seen);
            Arc::new(FnProvisioner::new(move |descriptor: ResourceDescriptor, inputs: ResolvedInputs| {
                let seen = Arc::clone(&seen);
                async move {
                    let mut outputs = Outputs::new();
                    if descriptor.name() == "registry" {
                        outputs.insert(String::from("loginServer"), json!("acr.azurecr.io"));
                    } else {
                        *seen.lock().unwrap() = Some(inputs);
                    }
                    Ok::<_, ProvisionError>(outputs)
                }
            }))
        };
        let config = MapConfigSource::new()
            .with_config("location", "westeurope")
            .with_secret("registryPassword", "hunter2");
        let executor = Executor::new(provisioner, Arc::new(config));

        let plan = plan(vec![
            ResourceDescriptor::new("azure-native:containerregistry:Registry", "registry"),
            ResourceDescriptor::new("docker:Image", "image")
                .with_input(
                    "imageName",
                    InputValue::interpolate("${registry.loginServer}/backstage:latest").unwrap(),
                )
                .with_input("location", InputValue::config("location", None))
                .with_input("password", InputValue::secret("registryPassword")),
        ])
        .unwrap();

        let result = executor.execute(&plan).await;
        assert!(result.is_success());

        let inputs = seen.lock().unwrap().clone().unwrap();
        assert_eq!(inputs.get("imageName"), Some(&json!("acr.azurecr.io/backstage:latest")));
        assert_eq!(inputs.get("location"), Some(&json!("westeurope")));
        assert_eq!(inputs.get("password"), Some(&json!("hunter2")));
        assert_eq!(inputs.secret_fields, vec!["password"]);
        assert_eq!(inputs.redacted()["password"], json!("***"));
    }

    #[tokio::test]
    async fn test_missing_secret_fails_resource() {
        let mut config = MockConfigSource::new();
        config
            .expect_get_secret()
            .returning(|key| Err(ConfigError::MissingValue { key: key.to_string() }));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = Executor::new(recording(Arc::clone(&calls), &[]), Arc::new(config));
        let plan = plan(vec![
            ResourceDescriptor::new("azure-native:dbforpostgresql:Server", "postgres")
                .with_input("administratorLoginPassword", InputValue::secret("dbPassword")),
        ])
        .unwrap();

        let result = executor.execute(&plan).await;

        assert!(calls.lock().unwrap().is_empty());
        assert!(matches!(
            result.errors[0].error,
            StackError::Config(ConfigError::MissingValue { ref key }) if key == "dbPassword"
        ));
    }

    #[tokio::test]
    async fn test_missing_output_field_fails_consumer() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor(recording(Arc::clone(&calls), &[]));
        let plan = plan(vec![
            resource("a", &[]),
            ResourceDescriptor::new("test:Resource", "b").with_input("host", InputValue::output("a", "hostName")),
        ])
        .unwrap();

        let result = executor.execute(&plan).await;

        assert!(matches!(
            result.errors[0].error,
            StackError::Output(OutputError::MissingOutput { ref field, .. }) if field == "hostName"
        ));
        assert_eq!(*calls.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_empty_plan_is_success() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor(recording(calls, &[]));
        let result = executor.execute(&plan(Vec::new()).unwrap()).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_resolve_value_after_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor(recording(calls, &[]));
        executor.execute(&plan(vec![resource("a", &[])]).unwrap()).await;

        let url = InputValue::interpolate("https://${a.id}.example.com").unwrap();
        assert_eq!(
            executor.resolve_value(&url).await.unwrap(),
            json!("https://id-a.example.com")
        );

        let err = executor
            .resolve_value(&InputValue::output("missing", "id"))
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::Output(OutputError::UnknownResource { .. })));
    }

    #[test]
    fn test_is_static() {
        assert!(is_static(&InputValue::literal("westeurope")));
        assert!(is_static(&InputValue::List(vec![InputValue::literal(1)])));
        assert!(!is_static(&InputValue::output("rg", "name")));
        assert!(!is_static(&InputValue::secret("token")));
    }
}
