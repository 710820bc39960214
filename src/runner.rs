//! Stack runner.
//!
//! Ties the pieces together for one stack: validation, planning, diffing
//! against the run record, execution, export resolution and persistence of
//! the outcome.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, ConfigValidator, StackConfig, ValidationResult};
use crate::engine::{ConfigSource, Provisioner};
use crate::error::Result;
use crate::planner::{
    DiffEngine, DiffResult, ExecutionOptions, ExecutionPlan, Executor, RunResult, plan,
};
use crate::state::{LockInfo, RunHistoryEntry, RunOperation, StackState, StateStore};

/// Placeholder stored instead of a secret-derived export value.
pub const REDACTED: &str = "***";

/// Runs one stack against a provisioning engine and a run record.
pub struct StackRunner<'a, S: StateStore> {
    /// Stack file contents.
    config: &'a StackConfig,
    /// Run record store.
    state_store: &'a S,
    /// Config values and secrets.
    config_source: Arc<dyn ConfigSource>,
    /// Run options.
    options: ExecutionOptions,
    /// Stack validator.
    validator: ConfigValidator,
    /// Stack hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
}

/// What an apply would do, computed without provisioning anything.
#[derive(Debug)]
pub struct Preview {
    /// Validation findings.
    pub validation: ValidationResult,
    /// Batches to run.
    pub plan: ExecutionPlan,
    /// Changes since the last run.
    pub diff: DiffResult,
}

/// Outcome of an apply.
#[derive(Debug)]
pub struct ApplyReport {
    /// Per-resource outcome of the run.
    pub run: RunResult,
    /// Resolved stack exports.
    pub exports: BTreeMap<String, Value>,
    /// Exports that could not be resolved, with the reason.
    pub export_errors: Vec<ExportFailure>,
    /// Run record as saved.
    pub state: StackState,
}

/// An export that could not be resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ExportFailure {
    /// Export name.
    pub name: String,
    /// Why it failed.
    pub reason: String,
}

impl<'a, S: StateStore> StackRunner<'a, S> {
    /// Creates a new runner using the stack's own settings.
    #[must_use]
    pub fn new(
        config: &'a StackConfig,
        state_store: &'a S,
        config_source: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            config,
            state_store,
            config_source,
            options: config.settings.execution_options(),
            validator: ConfigValidator::new(),
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Overrides the run options.
    #[must_use]
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses `validator` instead of a default one.
    #[must_use]
    pub fn with_validator(mut self, validator: ConfigValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Validates, plans and diffs against the run record.
    ///
    /// # Errors
    ///
    /// Returns an error if validation or planning fails, or the record
    /// cannot be read.
    pub async fn preview(&self) -> Result<Preview> {
        let (validation, plan) = self.plan()?;
        let state = self.state_store.load().await?;
        let diff = self.diff_engine.compute(&plan, state.as_ref());

        info!(
            "Diff: {} creates, {} updates, {} unchanged, {} orphaned",
            diff.creates, diff.updates, diff.unchanged, diff.orphaned
        );

        Ok(Preview {
            validation,
            plan,
            diff,
        })
    }

    /// Provisions the whole stack through `provisioner` and records the outcome.
    ///
    /// The record is locked for the duration of the run. Resource failures
    /// are reported in the returned [`ApplyReport`]; only problems before the
    /// run starts or while saving the record are errors.
    ///
    /// # Errors
    ///
    /// Returns an error if validation or planning fails, the record is
    /// locked by someone else, or the record cannot be read or saved.
    pub async fn apply(
        &self,
        provisioner: Arc<dyn Provisioner>,
        holder: &str,
    ) -> Result<ApplyReport> {
        info!(
            "Applying stack {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let (_, plan) = self.plan()?;
        let lock = self.state_store.acquire_lock(holder).await?;

        let outcome = self.apply_locked(&plan, provisioner).await;

        if let Err(e) = self.release(&lock).await {
            error!("Failed to release state lock: {e}");
        }
        outcome
    }

    fn plan(&self) -> Result<(ValidationResult, ExecutionPlan)> {
        let validation = self.validator.validate(self.config)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }
        let plan = plan(self.config.descriptors()?)?;
        debug!(
            "Planned {} resources in {} batches",
            plan.resource_count(),
            plan.batches().len()
        );
        Ok((validation, plan))
    }

    async fn release(&self, lock: &LockInfo) -> Result<()> {
        self.state_store.release_lock(&lock.lock_id).await
    }

    async fn apply_locked(
        &self,
        plan: &ExecutionPlan,
        provisioner: Arc<dyn Provisioner>,
    ) -> Result<ApplyReport> {
        let previous = self.state_store.load().await?;
        let operation = match &previous {
            Some(state) if !state.is_empty() => RunOperation::Update,
            _ => RunOperation::Create,
        };
        let mut state = previous.unwrap_or_else(|| {
            StackState::new(&self.config.project.name, &self.config.project.environment)
        });
        state.project.clone_from(&self.config.project.name);
        state.environment.clone_from(&self.config.project.environment);

        let executor = Executor::new(provisioner, Arc::clone(&self.config_source))
            .with_options(self.options.clone());

        let run = executor.execute(plan).await;

        for descriptor in plan.graph().descriptors() {
            let name = descriptor.name();
            let hash = self.hasher.hash_descriptor(descriptor);
            let resource_type = descriptor.resource_type().as_str();
            if let Some(outputs) = run.outputs.get(name) {
                state.record_success(name, resource_type, &hash, outputs.clone());
            } else if let Some(failure) = run.errors.iter().find(|f| f.resource == name) {
                state.record_failure(name, resource_type, &hash, &failure.error.to_string());
            }
        }

        let (exports, export_errors) = self.resolve_exports(&executor).await?;
        state.exports.clone_from(&exports);

        let config_hash = self.hasher.hash_stack(self.config);
        state.config_hash.clone_from(&config_hash);
        let provisioned: Vec<String> = run.succeeded().into_iter().map(String::from).collect();
        let entry = match run.root_failure() {
            Some(failure) => RunHistoryEntry::failed(
                operation,
                &config_hash,
                provisioned,
                &format!("{}: {}", failure.resource, failure.error),
            ),
            None if !export_errors.is_empty() => RunHistoryEntry::failed(
                operation,
                &config_hash,
                provisioned,
                &format!("{} exports could not be resolved", export_errors.len()),
            ),
            None => RunHistoryEntry::new(operation, &config_hash, provisioned),
        };
        state.add_history(entry);

        self.state_store.save(&state).await?;

        if run.is_success() && export_errors.is_empty() {
            info!("Apply finished: {} resources provisioned", run.outputs.len());
        } else {
            warn!(
                "Apply finished with problems: {} failed, {} skipped, {} not started, {} exports unresolved",
                run.errors.len(),
                run.skipped.len(),
                run.not_started.len(),
                export_errors.len()
            );
        }

        Ok(ApplyReport {
            run,
            exports,
            export_errors,
            state,
        })
    }

    /// Resolves every export from the outputs of the run.
    async fn resolve_exports(
        &self,
        executor: &Executor,
    ) -> Result<(BTreeMap<String, Value>, Vec<ExportFailure>)> {
        let mut exports = BTreeMap::new();
        let mut failures = Vec::new();

        for (name, value) in self.config.exports()? {
            match executor.resolve_value(&value).await {
                Ok(_) if value.contains_secret() => {
                    warn!("Export {name} is derived from a secret; storing it redacted");
                    exports.insert(name, Value::String(String::from(REDACTED)));
                }
                Ok(resolved) => {
                    exports.insert(name, resolved);
                }
                Err(e) => {
                    warn!("Export {name} could not be resolved: {e}");
                    failures.push(ExportFailure {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok((exports, failures))
    }
}

impl ApplyReport {
    /// Returns true if every resource and every export resolved.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.run.is_success() && self.export_errors.is_empty()
    }
}
