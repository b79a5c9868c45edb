//! State management module.
//!
//! This module persists checkpoints: the recorded state of every resource in
//! a stack, written incrementally as a deployment progresses.

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{
    CHECKPOINT_VERSION, Checkpoint, DeploymentHistoryEntry, DeploymentOperation, Manifest,
    PendingOperation,
};
