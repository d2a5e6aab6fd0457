//! # Cell Edit Task
//!
//! Publishes edits queued by
//! [`ChunkStore::submit_cell_material`](crate::engine_state::voxels::world::ChunkStore::submit_cell_material)
//! so that a slow source, typically a remote authority, never stalls the
//! thread that made the edit.

use std::sync::Arc;

use log::{trace, warn};

use crate::engine_state::{
    task_management::task::{Task, TaskResult},
    voxels::world::StoreShared,
};

/// Drains the store's edit queue on a worker.
///
/// At most one of these runs per store at a time, which keeps edits in the
/// order they were made.
pub struct CellEditTask {
    store: Arc<StoreShared>,
}

impl CellEditTask {
    pub(crate) fn new(store: Arc<StoreShared>) -> Self {
        CellEditTask { store }
    }
}

impl Task for CellEditTask {
    fn process(&self) -> Box<dyn TaskResult + Send> {
        let failed = self.store.drain_edits();
        Box::new(CellEditTaskResult { failed })
    }
}

pub struct CellEditTaskResult {
    failed: usize,
}

impl TaskResult for CellEditTaskResult {
    fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task + Send>> {
        if self.failed > 0 {
            warn!("{} cell edits were rejected and rolled back", self.failed);
        } else {
            trace!("Cell edits published");
        }
        Vec::new()
    }
}
