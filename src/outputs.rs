//! Output store for resolved resource outputs.
//!
//! The store maps `(resource, field)` to a deferred value. Each key starts
//! `Pending` and moves exactly once to a terminal state. Readers wait on a
//! per-key `watch` channel, so resolution wakes every waiter of that key and
//! nobody polls.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::OutputError;

/// Outputs reported by a provisioned resource, keyed by field name.
pub type Outputs = BTreeMap<String, Value>;

/// Callback invoked once when a key resolves.
pub type Continuation = Box<dyn FnOnce(Result<Value, OutputError>) + Send>;

/// State of one output key.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputState {
    /// Not known yet.
    Pending,
    /// Resolved to a value.
    Resolved(Value),
    /// The owning resource failed; holds the reason.
    Failed(String),
    /// The owning resource succeeded without reporting this field.
    Missing,
}

/// Provisioning phase of a resource as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePhase {
    /// Registered for the run, not started.
    Waiting,
    /// Provisioning has started.
    InProgress,
    /// Provisioned; outputs are sealed.
    Completed,
    /// Failed, skipped or aborted.
    Failed,
}

struct Slot {
    tx: watch::Sender<OutputState>,
    continuations: Vec<Continuation>,
}

struct ResourceEntry {
    phase: ResourcePhase,
    fields: HashMap<String, Slot>,
}

/// Shared store of resource outputs.
#[derive(Default)]
pub struct OutputStore {
    inner: Mutex<HashMap<String, ResourceEntry>>,
}

impl OutputState {
    /// Returns true once the key can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    fn to_result(&self, resource: &str, field: &str) -> Option<Result<Value, OutputError>> {
        match self {
            Self::Pending => None,
            Self::Resolved(value) => Some(Ok(value.clone())),
            Self::Failed(_) => Some(Err(OutputError::UpstreamFailure {
                resource: resource.to_string(),
            })),
            Self::Missing => Some(Err(OutputError::MissingOutput {
                resource: resource.to_string(),
                field: field.to_string(),
            })),
        }
    }
}

impl Slot {
    fn pending() -> Self {
        let (tx, _rx) = watch::channel(OutputState::Pending);
        Self {
            tx,
            continuations: Vec::new(),
        }
    }

    /// Moves a pending slot to `state` and hands back its continuations.
    fn settle(&mut self, state: OutputState) -> Vec<Continuation> {
        self.tx.send_replace(state);
        std::mem::take(&mut self.continuations)
    }
}

impl ResourceEntry {
    fn new(phase: ResourcePhase) -> Self {
        Self {
            phase,
            fields: HashMap::new(),
        }
    }

    const fn is_sealed(&self) -> bool {
        matches!(self.phase, ResourcePhase::Completed | ResourcePhase::Failed)
    }

    /// Result for a field that has no slot, or `None` if a reader should wait.
    fn absent_field(&self, resource: &str, field: &str) -> Option<Result<Value, OutputError>> {
        match self.phase {
            ResourcePhase::Completed => Some(Err(OutputError::MissingOutput {
                resource: resource.to_string(),
                field: field.to_string(),
            })),
            ResourcePhase::Failed => Some(Err(OutputError::UpstreamFailure {
                resource: resource.to_string(),
            })),
            ResourcePhase::Waiting | ResourcePhase::InProgress => None,
        }
    }
}

impl OutputStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ResourceEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a resource that will be provisioned later in the run.
    ///
    /// Readers of a registered resource wait instead of failing with
    /// [`OutputError::UnknownResource`].
    pub fn register(&self, resource: &str) {
        self.lock()
            .entry(resource.to_string())
            .or_insert_with(|| ResourceEntry::new(ResourcePhase::Waiting));
    }

    /// Forgets everything recorded for a resource and registers it again.
    ///
    /// Keys still pending from the previous entry fail, so no reader is left
    /// waiting on a slot that can no longer resolve.
    pub fn reset(&self, resource: &str) {
        let state = OutputState::Failed(String::from("superseded by a new run"));
        let settled = {
            let mut inner = self.lock();
            let previous =
                inner.insert(resource.to_string(), ResourceEntry::new(ResourcePhase::Waiting));
            previous
                .map(|mut entry| Self::settle_pending(&mut entry, &state))
                .unwrap_or_default()
        };

        for (field, continuations) in settled {
            Self::notify(continuations, &state, resource, &field);
        }
        trace!("Output store: {resource} reset");
    }

    /// Marks a resource as being provisioned.
    pub fn begin(&self, resource: &str) {
        let mut inner = self.lock();
        let entry = inner
            .entry(resource.to_string())
            .or_insert_with(|| ResourceEntry::new(ResourcePhase::InProgress));
        if !entry.is_sealed() {
            entry.phase = ResourcePhase::InProgress;
        }
        trace!("Output store: {resource} in progress");
    }

    /// Writes one output key.
    ///
    /// Writing the same value again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::DuplicateOutput`] if the key already holds a
    /// different terminal state, or the resource is sealed.
    pub fn put(
        &self,
        resource: &str,
        field: &str,
        value: Result<Value, String>,
    ) -> Result<(), OutputError> {
        let next = match value {
            Ok(v) => OutputState::Resolved(v),
            Err(reason) => OutputState::Failed(reason),
        };

        let continuations = {
            let mut inner = self.lock();
            let entry = inner
                .entry(resource.to_string())
                .or_insert_with(|| ResourceEntry::new(ResourcePhase::InProgress));

            let duplicate = || OutputError::DuplicateOutput {
                resource: resource.to_string(),
                field: field.to_string(),
            };

            if entry.is_sealed() && !entry.fields.contains_key(field) {
                return Err(duplicate());
            }

            let slot = entry
                .fields
                .entry(field.to_string())
                .or_insert_with(Slot::pending);

            {
                let current = slot.tx.borrow();
                if current.is_terminal() {
                    return if *current == next { Ok(()) } else { Err(duplicate()) };
                }
            }

            slot.settle(next.clone())
        };

        debug!("Output resolved: {resource}.{field}");
        Self::notify(continuations, &next, resource, field);
        Ok(())
    }

    /// Records a successful resource: writes every output and seals the
    /// resource so fields it did not report read as missing.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::DuplicateOutput`] if any field conflicts with
    /// an earlier write.
    pub fn complete(&self, resource: &str, outputs: &Outputs) -> Result<(), OutputError> {
        for (field, value) in outputs {
            self.put(resource, field, Ok(value.clone()))?;
        }

        let settled = {
            let mut inner = self.lock();
            let entry = inner
                .entry(resource.to_string())
                .or_insert_with(|| ResourceEntry::new(ResourcePhase::InProgress));
            entry.phase = ResourcePhase::Completed;
            Self::settle_pending(entry, &OutputState::Missing)
        };

        for (field, continuations) in settled {
            Self::notify(continuations, &OutputState::Missing, resource, &field);
        }
        debug!("Output store: {resource} completed with {} outputs", outputs.len());
        Ok(())
    }

    /// Records a failed, skipped or aborted resource. Every pending key of the
    /// resource fails, and later reads fail immediately.
    pub fn fail(&self, resource: &str, reason: &str) {
        let state = OutputState::Failed(reason.to_string());
        let settled = {
            let mut inner = self.lock();
            let entry = inner
                .entry(resource.to_string())
                .or_insert_with(|| ResourceEntry::new(ResourcePhase::Failed));
            if entry.phase == ResourcePhase::Completed {
                return;
            }
            entry.phase = ResourcePhase::Failed;
            Self::settle_pending(entry, &state)
        };

        for (field, continuations) in settled {
            Self::notify(continuations, &state, resource, &field);
        }
        debug!("Output store: {resource} failed ({reason})");
    }

    /// Waits until a key is terminal and returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::UpstreamFailure`] if the owning resource failed,
    /// [`OutputError::MissingOutput`] if it succeeded without the field, and
    /// [`OutputError::UnknownResource`] if the resource is not in this run.
    pub async fn get(&self, resource: &str, field: &str) -> Result<Value, OutputError> {
        let mut rx = {
            let mut inner = self.lock();
            let Some(entry) = inner.get_mut(resource) else {
                return Err(OutputError::UnknownResource {
                    resource: resource.to_string(),
                });
            };

            if let Some(slot) = entry.fields.get(field) {
                slot.tx.subscribe()
            } else if let Some(result) = entry.absent_field(resource, field) {
                return result;
            } else {
                let slot = Slot::pending();
                let rx = slot.tx.subscribe();
                entry.fields.insert(field.to_string(), slot);
                rx
            }
        };

        trace!("Waiting for output {resource}.{field}");
        let state = rx
            .wait_for(OutputState::is_terminal)
            .await
            .map_err(|_| OutputError::UpstreamFailure {
                resource: resource.to_string(),
            })?;

        state.to_result(resource, field).unwrap_or_else(|| {
            Err(OutputError::UpstreamFailure {
                resource: resource.to_string(),
            })
        })
    }

    /// Reads a key without waiting. Returns `None` while it is pending.
    #[must_use]
    pub fn try_get(&self, resource: &str, field: &str) -> Option<Result<Value, OutputError>> {
        let inner = self.lock();
        let Some(entry) = inner.get(resource) else {
            return Some(Err(OutputError::UnknownResource {
                resource: resource.to_string(),
            }));
        };

        match entry.fields.get(field) {
            Some(slot) => slot.tx.borrow().to_result(resource, field),
            None => entry.absent_field(resource, field),
        }
    }

    /// Registers a continuation invoked exactly once when the key resolves.
    ///
    /// If the key is already terminal the continuation runs immediately on
    /// the caller's thread.
    pub fn get_or_subscribe(&self, resource: &str, field: &str, continuation: Continuation) {
        let ready = {
            let mut inner = self.lock();
            match inner.get_mut(resource) {
                None => Some(Err(OutputError::UnknownResource {
                    resource: resource.to_string(),
                })),
                Some(entry) => {
                    let known = entry.fields.get(field).map_or_else(
                        || entry.absent_field(resource, field),
                        |slot| slot.tx.borrow().to_result(resource, field),
                    );
                    if known.is_none() {
                        entry
                            .fields
                            .entry(field.to_string())
                            .or_insert_with(Slot::pending)
                            .continuations
                            .push(continuation);
                        return;
                    }
                    known
                }
            }
        };

        if let Some(result) = ready {
            continuation(result);
        }
    }

    /// Provisioning phase of a resource, if the store knows it.
    #[must_use]
    pub fn phase(&self, resource: &str) -> Option<ResourcePhase> {
        self.lock().get(resource).map(|entry| entry.phase)
    }

    /// Resolved outputs of one resource.
    #[must_use]
    pub fn outputs_of(&self, resource: &str) -> Outputs {
        let inner = self.lock();
        inner
            .get(resource)
            .map(|entry| {
                entry
                    .fields
                    .iter()
                    .filter_map(|(field, slot)| match &*slot.tx.borrow() {
                        OutputState::Resolved(value) => Some((field.clone(), value.clone())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn settle_pending(
        entry: &mut ResourceEntry,
        state: &OutputState,
    ) -> Vec<(String, Vec<Continuation>)> {
        entry
            .fields
            .iter_mut()
            .filter(|(_, slot)| !slot.tx.borrow().is_terminal())
            .map(|(field, slot)| (field.clone(), slot.settle(state.clone())))
            .collect()
    }

    fn notify(continuations: Vec<Continuation>, state: &OutputState, resource: &str, field: &str) {
        if continuations.is_empty() {
            return;
        }
        if let Some(result) = state.to_result(resource, field) {
            for continuation in continuations {
                continuation(result.clone());
            }
        }
    }
}

impl fmt::Debug for OutputStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("OutputStore")
            .field("resources", &inner.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_put_then_get() {
        let store = OutputStore::new();
        store.put("rg", "name", Ok(json!("rg-1234"))).unwrap();

        assert_eq!(store.get("rg", "name").await.unwrap(), json!("rg-1234"));
        assert_eq!(store.get("rg", "name").await.unwrap(), json!("rg-1234"));
    }

    #[test]
    fn test_put_same_value_is_noop() {
        let store = OutputStore::new();
        store.put("rg", "name", Ok(json!("rg-1234"))).unwrap();
        assert!(store.put("rg", "name", Ok(json!("rg-1234"))).is_ok());
    }

    #[test]
    fn test_put_different_value_is_duplicate() {
        let store = OutputStore::new();
        store.put("rg", "name", Ok(json!("rg-1234"))).unwrap();

        let err = store.put("rg", "name", Ok(json!("rg-9999"))).unwrap_err();
        assert_eq!(
            err,
            OutputError::DuplicateOutput {
                resource: String::from("rg"),
                field: String::from("name"),
            }
        );
    }

    #[tokio::test]
    async fn test_get_waits_for_put() {
        let store = Arc::new(OutputStore::new());
        store.register("registry");

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get("registry", "loginServer").await })
        };

        tokio::task::yield_now().await;
        assert!(store.try_get("registry", "loginServer").is_none());

        store
            .put("registry", "loginServer", Ok(json!("acr.azurecr.io")))
            .unwrap();

        let value = reader.await.unwrap().unwrap();
        assert_eq!(value, json!("acr.azurecr.io"));
    }

    #[tokio::test]
    async fn test_fail_wakes_waiters_with_upstream_failure() {
        let store = Arc::new(OutputStore::new());
        store.register("db");

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get("db", "fqdn").await })
        };
        tokio::task::yield_now().await;

        store.fail("db", "quota exceeded");

        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            OutputError::UpstreamFailure {
                resource: String::from("db"),
            }
        );
        assert!(matches!(
            store.get("db", "other").await,
            Err(OutputError::UpstreamFailure { .. })
        ));
        assert_eq!(store.phase("db"), Some(ResourcePhase::Failed));
    }

    #[tokio::test]
    async fn test_complete_seals_missing_fields() {
        let store = OutputStore::new();
        store.begin("app");

        let mut outputs = Outputs::new();
        outputs.insert(String::from("defaultHostName"), json!("app.azurewebsites.net"));
        store.complete("app", &outputs).unwrap();

        assert_eq!(
            store.get("app", "defaultHostName").await.unwrap(),
            json!("app.azurewebsites.net")
        );
        assert!(matches!(
            store.get("app", "identity").await,
            Err(OutputError::MissingOutput { .. })
        ));
        assert!(store.put("app", "late", Ok(json!(1))).is_err());
        assert_eq!(store.outputs_of("app"), outputs);
    }

    #[tokio::test]
    async fn test_reset_forgets_completed_outputs() {
        let store = Arc::new(OutputStore::new());
        let mut first = Outputs::new();
        first.insert(String::from("id"), json!("a-run0"));
        store.begin("a");
        store.complete("a", &first).unwrap();

        store.reset("a");
        assert_eq!(store.phase("a"), Some(ResourcePhase::Waiting));

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get("a", "id").await })
        };
        tokio::task::yield_now().await;
        assert!(store.try_get("a", "id").is_none());

        let mut second = Outputs::new();
        second.insert(String::from("id"), json!("a-run1"));
        store.begin("a");
        store.complete("a", &second).unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), json!("a-run1"));
    }

    #[tokio::test]
    async fn test_reset_fails_pending_readers() {
        let store = Arc::new(OutputStore::new());
        store.register("db");

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get("db", "fqdn").await })
        };
        tokio::task::yield_now().await;

        store.reset("db");

        assert!(matches!(
            reader.await.unwrap(),
            Err(OutputError::UpstreamFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_resource_does_not_block() {
        let store = OutputStore::new();
        assert!(matches!(
            store.get("ghost", "id").await,
            Err(OutputError::UnknownResource { .. })
        ));
    }

    #[test]
    fn test_subscribe_invoked_exactly_once() {
        let store = OutputStore::new();
        store.register("vnet");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        store.get_or_subscribe(
            "vnet",
            "id",
            Box::new(move |result| {
                assert_eq!(result.unwrap(), json!("vnet-1"));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.put("vnet", "id", Ok(json!("vnet-1"))).unwrap();
        store.put("vnet", "id", Ok(json!("vnet-1"))).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        store.get_or_subscribe(
            "vnet",
            "id",
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
