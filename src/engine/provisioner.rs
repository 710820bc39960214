//! Provisioning engine capability.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;

use crate::error::ProvisionError;
use crate::outputs::Outputs;
use crate::resource::{ResolvedInputs, ResourceDescriptor};

/// Creates or updates one resource and reports its outputs.
///
/// Implementations must be idempotent: provisioning a resource whose inputs
/// did not change returns the same outputs without side effects. The executor
/// never retries a failed call.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provisions `descriptor` with fully resolved inputs.
    async fn provision(
        &self,
        descriptor: &ResourceDescriptor,
        inputs: &ResolvedInputs,
    ) -> Result<Outputs, ProvisionError>;

    /// Short name of the engine, used in logs.
    fn engine_name(&self) -> &'static str;
}

/// Provisioner backed by a closure.
///
/// The closure receives owned copies of the descriptor and inputs so the
/// returned future may outlive the call.
pub struct FnProvisioner<F> {
    func: F,
}

impl<F, Fut> FnProvisioner<F>
where
    F: Fn(ResourceDescriptor, ResolvedInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outputs, ProvisionError>> + Send + 'static,
{
    /// Wraps a provisioning closure.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Provisioner for FnProvisioner<F>
where
    F: Fn(ResourceDescriptor, ResolvedInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outputs, ProvisionError>> + Send + 'static,
{
    async fn provision(
        &self,
        descriptor: &ResourceDescriptor,
        inputs: &ResolvedInputs,
    ) -> Result<Outputs, ProvisionError> {
        (self.func)(descriptor.clone(), inputs.clone()).await
    }

    fn engine_name(&self) -> &'static str {
        "fn"
    }
}

impl<F> fmt::Debug for FnProvisioner<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvisioner").finish_non_exhaustive()
    }
}
