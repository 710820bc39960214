//! State store trait definition.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::StackState;

/// Trait for run record storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the run record.
    ///
    /// Returns `None` if no record exists yet.
    async fn load(&self) -> Result<Option<StackState>>;

    /// Saves the run record.
    async fn save(&self, state: &StackState) -> Result<()>;

    /// Checks if a record exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires a lock on the record.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock on the record.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of holder.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the record is locked.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
