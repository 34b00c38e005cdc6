//! State backends for the CodeBuild stack.
//!
//! Implements [`stack::StateBackend`] twice:
//!
//! - [`MemoryStateBackend`] keeps records in process. Used by `preview` runs
//!   that must not touch disk and by tests.
//! - [`FileStateBackend`] persists records as one JSON document per stack at
//!   `<state-dir>/<stack>.json`, rewritten atomically after every change.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File formats and I/O live here. The `engine` crate sees
//! only [`stack::StateBackend`].
//!
//! Records hold the declared inputs already redacted by the graph's
//! serialization, so no secret value ever reaches a state file.

mod file;
mod memory;

pub use file::{FileStateBackend, StateDocument, STATE_FORMAT_VERSION};
pub use memory::MemoryStateBackend;

use stack::{ResourceName, ResourceState};

/// Inserts or replaces `state` in `records`, preserving first-write order.
fn upsert(records: &mut Vec<ResourceState>, state: ResourceState) {
    match records.iter_mut().find(|r| r.name == state.name) {
        Some(existing) => *existing = state,
        None => records.push(state),
    }
}

fn take(records: &mut Vec<ResourceState>, name: &ResourceName) -> Option<ResourceState> {
    let position = records.iter().position(|r| &r.name == name)?;
    Some(records.remove(position))
}
