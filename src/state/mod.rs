//! Run record persistence.
//!
//! After each `apply` the outcome of every resource, the resolved stack
//! exports and a history entry are written to a local JSON file. The record
//! drives `plan` diffs and the `outputs` command.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LOCK_FILE, LocalStateStore, STATE_FILE};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{
    MAX_HISTORY, ResourceRecord, ResourceStatus, RunHistoryEntry, RunOperation, STATE_VERSION,
    StackState,
};
