//! # Chunk Population Task
//!
//! This module defines the `ChunkPopulationTask`, which populates one chunk
//! on a worker thread. The task is scheduled by
//! [`ChunkStore::get_chunk`](crate::engine_state::voxels::world::ChunkStore::get_chunk)
//! when a caller asks for a missing chunk without wanting to block.

use std::sync::Arc;

use log::{trace, warn};

use crate::engine_state::{
    task_management::task::{Task, TaskResult},
    voxels::{coords::ChunkIndex, world::StoreShared},
};
use crate::error::WorldError;

/// A task that populates a chunk asynchronously.
///
/// The store has already marked `index` in flight; this task is the one
/// population for it. The chunk is published to the store inside `process()`,
/// so it becomes visible the moment the worker finishes.
pub struct ChunkPopulationTask {
    /// The store that claimed the population
    store: Arc<StoreShared>,
    /// Normalized index of the chunk to populate
    index: ChunkIndex,
}

impl ChunkPopulationTask {
    /// Creates a new chunk population task.
    ///
    /// # Arguments
    /// * `store` - Shared state of the store that marked `index` in flight
    /// * `index` - The chunk to populate
    pub(crate) fn new(store: Arc<StoreShared>, index: ChunkIndex) -> Self {
        ChunkPopulationTask { store, index }
    }
}

impl Task for ChunkPopulationTask {
    fn process(&self) -> Box<dyn TaskResult + Send> {
        let error = self.store.populate(self.index).err();
        Box::new(ChunkPopulationTaskResult {
            index: self.index,
            error,
        })
    }
}

/// Outcome of a population, reported when results are drained.
pub struct ChunkPopulationTaskResult {
    index: ChunkIndex,
    error: Option<WorldError>,
}

impl TaskResult for ChunkPopulationTaskResult {
    /// A failed population leaves the chunk absent; the next request for it
    /// starts a fresh one.
    fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task + Send>> {
        match self.error {
            Some(err) => warn!("Population of chunk {:?} failed: {}", self.index, err),
            None => trace!("Chunk {:?} populated", self.index),
        }
        Vec::new()
    }
}
