//! # World Module
//!
//! This module provides the `ChunkStore`, the single point of truth each
//! process consults for cell data on one planet.
//!
//! ## Architecture
//!
//! The store is a sparse cache: only chunks that have been requested are
//! resident, bounded by an LRU capacity. A chunk that is not resident is
//! populated from the store's [`ChunkSource`], either on the calling thread or
//! on the task workers.
//!
//! ```text
//!             get_chunk(index, allow_async)
//!                        |
//!        resident? ------+------ yes --> handle
//!                        | no
//!   in flight/pinned? ---+------ yes --> async: None / sync: wait for it
//!                        | no
//!        mark in flight, count population
//!                        |
//!          async: publish ChunkPopulationTask --> None
//!          sync:  populate on this thread   --> handle
//! ```
//!
//! ## Guarantees
//!
//! - A reader never sees a partially populated chunk; chunks enter the cache
//!   whole.
//! - At most one population runs per chunk index. Concurrent requests join the
//!   one in flight.
//! - A chunk under edit is pinned until the source has taken the edit. If
//!   the LRU evicts it meanwhile, requests for its index wait (or return
//!   `None` when async) instead of repopulating, and the edited chunk is put
//!   back when the pin is released. A reload therefore never races an edit.
//! - Every source reloads a chunk with the edits it has taken: the authority
//!   persists them, the offline generator keeps an overlay and the remote
//!   authority serves them back.
//! - The store never renders. It raises `render_dirty` and exposes the dirty
//!   set; the renderer clears it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use cgmath::Vector3;
use log::{debug, warn};
use lru::LruCache;

use super::block::material::Material;
use super::chunk::Chunk;
use super::chunk_source::ChunkSource;
use super::coords::{CellLoc, ChunkIndex};
use super::planet::Planet;
use super::tasks::{cell_edit_task::CellEditTask, chunk_population_task::ChunkPopulationTask};
use crate::core::MtResource;
use crate::engine_state::task_management::{task::Task, TaskManager};
use crate::error::Result;

/// Sizing of a `ChunkStore`.
#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    /// Upper bound on resident chunks before the least recently used is evicted.
    pub max_resident_chunks: usize,
    /// Worker threads for asynchronous population, started on first use.
    pub worker_threads: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_resident_chunks: 4096,
            worker_threads: 2,
        }
    }
}

struct StoreState {
    resident: LruCache<ChunkIndex, MtResource<Chunk>>,
    in_flight: HashSet<ChunkIndex>,
    /// Edits not yet taken by the source, per chunk.
    pinned: HashMap<ChunkIndex, usize>,
}

/// An edit applied locally and waiting for the source.
struct PendingEdit {
    loc: CellLoc,
    material: Material,
    previous: Material,
    chunk: MtResource<Chunk>,
}

#[derive(Default)]
struct EditQueue {
    pending: VecDeque<PendingEdit>,
    draining: bool,
}

/// The part of the store the worker tasks share with it.
pub(crate) struct StoreShared {
    planet: Planet,
    source: Box<dyn ChunkSource>,
    state: Mutex<StoreState>,
    populated: Condvar,
    populations_started: AtomicUsize,
    edits: Mutex<EditQueue>,
}

impl StoreShared {
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_edits(&self) -> MutexGuard<'_, EditQueue> {
        self.edits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the resident chunk at `index` and keeps its index from being
    /// repopulated until the matching `unpin`.
    fn pin(&self, index: ChunkIndex) -> Option<MtResource<Chunk>> {
        let mut state = self.lock_state();
        let chunk = state.resident.get(&index).cloned()?;
        *state.pinned.entry(index).or_insert(0) += 1;
        Some(chunk)
    }

    /// Releases a pin. A chunk the LRU dropped while pinned is put back, since
    /// it is the only copy holding the edit.
    fn unpin(&self, index: ChunkIndex, chunk: &MtResource<Chunk>) {
        let mut state = self.lock_state();
        if let Some(count) = state.pinned.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                state.pinned.remove(&index);
            }
        }
        if !state.resident.contains(&index) {
            debug!("Restoring edited chunk {:?} of planet {}", index, self.planet.id);
            if let Some((evicted, _)) = state.resident.push(index, chunk.clone()) {
                debug!("Evicted chunk {:?} of planet {}", evicted, self.planet.id);
            }
        }
        drop(state);

        self.populated.notify_all();
    }

    /// Publishes queued background edits, oldest first, until the queue is
    /// empty.
    ///
    /// # Returns
    /// The number of edits the source rejected and that were rolled back.
    pub(crate) fn drain_edits(&self) -> usize {
        let mut failed = 0;
        loop {
            let edit = {
                let mut queue = self.lock_edits();
                match queue.pending.pop_front() {
                    Some(edit) => edit,
                    None => {
                        queue.draining = false;
                        return failed;
                    }
                }
            };

            let index = self.planet.chunk_index_of(edit.loc);
            let snapshot = edit.chunk.get().clone();
            if let Err(err) = self.source.publish_edit(&self.planet, edit.loc, edit.material, &snapshot) {
                warn!(
                    "Edit of {:?} to {:?} failed, restoring {:?}: {}",
                    edit.loc, edit.material, edit.previous, err
                );
                let mut chunk = edit.chunk.get_mut();
                // A later edit of the same cell keeps its own value.
                if chunk.material(edit.loc) == edit.material {
                    chunk.set_material(edit.loc, edit.previous);
                    chunk.render_dirty = true;
                }
                failed += 1;
            }
            self.unpin(index, &edit.chunk);
        }
    }

    /// Runs one population claimed by the caller, publishes the outcome and
    /// wakes every waiter.
    pub(crate) fn populate(&self, index: ChunkIndex) -> Result<MtResource<Chunk>> {
        let outcome = self.source.load_chunk(&self.planet, index);

        let mut state = self.lock_state();
        state.in_flight.remove(&index);
        let result = outcome.map(|mut chunk| {
            chunk.index = index;
            chunk.render_dirty = true;
            let handle = MtResource::new(chunk);
            if let Some((evicted, _)) = state.resident.push(index, handle.clone()) {
                if evicted != index {
                    debug!("Evicted chunk {:?} of planet {}", evicted, self.planet.id);
                }
            }
            handle
        });
        drop(state);

        self.populated.notify_all();
        result
    }
}

/// In-memory sparse cache of one planet's chunks.
///
/// # Examples
///
/// ```
/// use sphere_world::config::Registries;
/// use sphere_world::engine_state::voxels::{
///     chunk_source::GeneratedSource, coords::ChunkIndex, planet::Planet,
///     world::{ChunkStore, StoreOptions},
/// };
///
/// let registries = Registries::builtin();
/// let record = registries.presets.get("planet").unwrap()[0].to_record(7);
/// let planet = Planet::from_record(&record);
/// let generator = registries.generators.bind(&planet).unwrap();
/// let store = ChunkStore::new(planet, Box::new(GeneratedSource::new(generator)), StoreOptions::default());
///
/// let chunk = store.get_chunk(ChunkIndex::new(0, 0, 0), false).unwrap().unwrap();
/// assert_eq!(chunk.get().materials().len(), 4096);
/// ```
pub struct ChunkStore {
    shared: Arc<StoreShared>,
    task_manager: Mutex<Option<TaskManager>>,
    worker_threads: usize,
}

impl ChunkStore {
    pub fn new(planet: Planet, source: Box<dyn ChunkSource>, options: StoreOptions) -> Self {
        let capacity = NonZeroUsize::new(options.max_resident_chunks).unwrap_or(NonZeroUsize::MIN);
        ChunkStore {
            shared: Arc::new(StoreShared {
                planet,
                source,
                state: Mutex::new(StoreState {
                    resident: LruCache::new(capacity),
                    in_flight: HashSet::new(),
                    pinned: HashMap::new(),
                }),
                populated: Condvar::new(),
                populations_started: AtomicUsize::new(0),
                edits: Mutex::new(EditQueue::default()),
            }),
            task_manager: Mutex::new(None),
            worker_threads: options.worker_threads.max(1),
        }
    }

    pub fn planet(&self) -> &Planet {
        &self.shared.planet
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Option<TaskManager>> {
        self.task_manager.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(&self, task: Box<dyn Task + Send>) {
        let mut tasks = self.lock_tasks();
        let manager = tasks.get_or_insert_with(|| TaskManager::new(self.worker_threads));
        manager.publish_task(task);
    }

    /// Returns the chunk at `index`, populating it if needed.
    ///
    /// # Arguments
    /// * `index` - Chunk index; longitude wraps
    /// * `allow_async` - When the chunk is not resident, schedule population
    ///   on the workers and return `None` instead of blocking
    ///
    /// # Returns
    /// - `Ok(Some(chunk))` if the chunk is resident or was populated synchronously
    /// - `Ok(None)` if population was scheduled or joined asynchronously
    ///
    /// # Errors
    /// `OutOfRange` for an index outside the planet, or the source's error
    /// for a synchronous population that failed.
    pub fn get_chunk(&self, index: ChunkIndex, allow_async: bool) -> Result<Option<MtResource<Chunk>>> {
        let index = self.shared.planet.normalize_chunk_index(index)?;
        let mut state = self.shared.lock_state();
        loop {
            if let Some(chunk) = state.resident.get(&index) {
                return Ok(Some(chunk.clone()));
            }

            if state.in_flight.contains(&index) || state.pinned.contains_key(&index) {
                if allow_async {
                    return Ok(None);
                }
                // The population or edit may still sit in the task queue.
                if let Some(manager) = self.lock_tasks().as_mut() {
                    manager.process_queued_tasks();
                }
                state = self
                    .shared
                    .populated
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            state.in_flight.insert(index);
            self.shared.populations_started.fetch_add(1, Ordering::AcqRel);
            if allow_async {
                self.schedule(Box::new(ChunkPopulationTask::new(self.shared.clone(), index)));
                return Ok(None);
            }
            drop(state);
            return self.shared.populate(index).map(Some);
        }
    }

    /// The chunk at `index` if it is resident. Never populates.
    pub fn resident_chunk(&self, index: ChunkIndex) -> Option<MtResource<Chunk>> {
        let index = self.shared.planet.normalize_chunk_index(index).ok()?;
        self.shared.lock_state().resident.get(&index).cloned()
    }

    /// The material of a cell, populating its chunk as `get_chunk` would.
    ///
    /// # Returns
    /// `Ok(None)` while an asynchronous population is pending.
    pub fn cell_material(&self, loc: CellLoc, allow_async: bool) -> Result<Option<Material>> {
        let loc = self.shared.planet.normalize_cell_loc(loc)?;
        let index = self.shared.planet.chunk_index_of(loc);
        Ok(self
            .get_chunk(index, allow_async)?
            .map(|chunk| chunk.get().material(loc)))
    }

    /// The material at a Cartesian position.
    ///
    /// # Returns
    /// `Ok(None)` outside the planet's altitude band or while the chunk is
    /// still loading.
    pub fn material_at(&self, pos: Vector3<f64>, allow_async: bool) -> Result<Option<Material>> {
        match self.shared.planet.cartesian_to_cell_loc(pos) {
            Some(loc) => self.cell_material(loc, allow_async),
            None => Ok(None),
        }
    }

    /// Sets one cell and waits for the source to take the edit.
    ///
    /// The edit is handed to the source while the chunk is write-locked; on
    /// the authority that is a persistence write, so the edit is durable
    /// before this returns. The chunk stays pinned until then. If the source
    /// fails the cell is restored. Setting a cell to the material it already
    /// holds changes nothing.
    ///
    /// # Returns
    /// - `Ok(true)` if the chunk is resident and now holds `material`
    /// - `Ok(false)` if the chunk is not resident; nothing happened
    ///
    /// # Errors
    /// `OutOfRange` for a cell outside the planet, or the source's error.
    pub fn set_cell_material(&self, loc: CellLoc, material: Material) -> Result<bool> {
        let planet = &self.shared.planet;
        let loc = planet.normalize_cell_loc(loc)?;
        let index = planet.chunk_index_of(loc);
        let Some(handle) = self.shared.pin(index) else {
            debug!("Ignoring edit of {:?}: chunk not resident", loc);
            return Ok(false);
        };

        let outcome = {
            let mut chunk = handle.get_mut();
            let previous = chunk.set_material(loc, material);
            if previous == material {
                Ok(true)
            } else if let Err(err) = self.shared.source.publish_edit(planet, loc, material, &chunk) {
                warn!("Edit of {:?} to {:?} failed, restoring {:?}: {}", loc, material, previous, err);
                chunk.set_material(loc, previous);
                Err(err)
            } else {
                chunk.render_dirty = true;
                Ok(true)
            }
        };
        self.shared.unpin(index, &handle);
        outcome
    }

    /// Sets one cell now and publishes the edit on the task workers.
    ///
    /// The local chunk changes before this returns, so the edit is visible on
    /// the next frame. The chunk stays pinned until the source has taken the
    /// edit; if the source rejects it the cell is restored, unless a later
    /// edit has changed it again. Background edits reach the source in the
    /// order they were made.
    ///
    /// # Returns
    /// - `Ok(true)` if the chunk is resident and now holds `material`
    /// - `Ok(false)` if the chunk is not resident; nothing happened
    ///
    /// # Errors
    /// `OutOfRange` for a cell outside the planet.
    pub fn submit_cell_material(&self, loc: CellLoc, material: Material) -> Result<bool> {
        let planet = &self.shared.planet;
        let loc = planet.normalize_cell_loc(loc)?;
        let index = planet.chunk_index_of(loc);
        let Some(handle) = self.shared.pin(index) else {
            debug!("Ignoring edit of {:?}: chunk not resident", loc);
            return Ok(false);
        };

        let previous = {
            let mut chunk = handle.get_mut();
            let previous = chunk.set_material(loc, material);
            if previous != material {
                chunk.render_dirty = true;
            }
            previous
        };
        if previous == material {
            self.shared.unpin(index, &handle);
            return Ok(true);
        }

        let start_drain = {
            let mut queue = self.shared.lock_edits();
            queue.pending.push_back(PendingEdit {
                loc,
                material,
                previous,
                chunk: handle,
            });
            !std::mem::replace(&mut queue.draining, true)
        };
        if start_drain {
            self.schedule(Box::new(CellEditTask::new(self.shared.clone())));
        }
        Ok(true)
    }

    /// Resident chunks whose mesh must be rebuilt.
    pub fn dirty_chunks(&self) -> Vec<ChunkIndex> {
        let state = self.shared.lock_state();
        state
            .resident
            .iter()
            .filter(|(_, chunk)| chunk.get().render_dirty)
            .map(|(index, _)| *index)
            .collect()
    }

    /// Called by the renderer once it has rebuilt a chunk's mesh.
    ///
    /// # Returns
    /// Whether the chunk was resident.
    pub fn clear_render_dirty(&self, index: ChunkIndex) -> bool {
        let state = self.shared.lock_state();
        match state.resident.peek(&index) {
            Some(chunk) => {
                chunk.get_mut().render_dirty = false;
                true
            }
            None => false,
        }
    }

    /// Dispatches queued populations and drains finished ones. Called once
    /// per frame; a chunk becomes visible as soon as its population ends,
    /// whether or not this runs.
    pub fn process_completed_tasks(&self) -> usize {
        match self.lock_tasks().as_mut() {
            Some(manager) => {
                manager.process_queued_tasks();
                manager.process_completed_tasks()
            }
            None => 0,
        }
    }

    /// Populations started since the store was created, sync or async.
    pub fn population_count(&self) -> usize {
        self.shared.populations_started.load(Ordering::Acquire)
    }

    pub fn resident_count(&self) -> usize {
        self.shared.lock_state().resident.len()
    }

    /// Whether a population for `index` is under way.
    pub fn is_in_flight(&self, index: ChunkIndex) -> bool {
        self.shared.lock_state().in_flight.contains(&index)
    }

    /// Edits applied locally that the source has not taken yet.
    pub fn pending_edit_count(&self) -> usize {
        self.shared.lock_state().pinned.values().sum()
    }
}
