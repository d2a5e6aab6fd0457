//! # Chunk Sources
//!
//! Where a [`ChunkStore`](super::world::ChunkStore) gets chunks it does not
//! hold, and where it reports edits. One source is chosen per process:
//!
//! * [`PersistentSource`] - the authority: storage first, then the generator,
//!   persisting every generated chunk before it becomes visible
//! * [`RemoteSource`] - a client of a remote authority
//! * [`GeneratedSource`] - offline preview with no authority at all

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use super::block::material::Material;
use super::chunk::Chunk;
use super::coords::{CellLoc, ChunkIndex};
use super::generator::TerrainGenerator;
use super::planet::Planet;
use crate::error::Result;
use crate::network::client::WorldClient;
use crate::persistence::{ChunkBlob, WorldStore};

/// Populates chunks and publishes edits for one planet.
pub trait ChunkSource: Send + Sync {
    /// Produces a fully populated chunk. May block on storage or network I/O.
    fn load_chunk(&self, planet: &Planet, index: ChunkIndex) -> Result<Chunk>;

    /// Makes an edit durable or visible to the authority.
    ///
    /// Called with the chunk already holding the new material. A synchronous
    /// edit passes the write-locked chunk itself; a background submission
    /// passes a snapshot taken after the edit. Edits to one store reach the
    /// source in the order they were made. An error makes the store roll the
    /// cell back.
    fn publish_edit(&self, planet: &Planet, loc: CellLoc, material: Material, chunk: &Chunk) -> Result<()>;
}

/// Local generation only. Edits stay in memory, in an overlay that is laid
/// over every chunk the generator produces, so an evicted chunk reloads with
/// its edits.
pub struct GeneratedSource {
    generator: TerrainGenerator,
    edits: Mutex<HashMap<ChunkIndex, HashMap<CellLoc, Material>>>,
}

impl GeneratedSource {
    pub fn new(generator: TerrainGenerator) -> Self {
        Self {
            generator,
            edits: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cells the overlay holds.
    pub fn edit_count(&self) -> usize {
        let edits = self.edits.lock().unwrap_or_else(PoisonError::into_inner);
        edits.values().map(HashMap::len).sum()
    }
}

impl ChunkSource for GeneratedSource {
    fn load_chunk(&self, _planet: &Planet, index: ChunkIndex) -> Result<Chunk> {
        let mut chunk = self.generator.generate_chunk(index);
        let edits = self.edits.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cells) = edits.get(&index) {
            for (loc, material) in cells {
                chunk.set_material(*loc, *material);
            }
            debug!("Replayed {} edits onto chunk {:?}", cells.len(), index);
        }
        Ok(chunk)
    }

    fn publish_edit(&self, planet: &Planet, loc: CellLoc, material: Material, _chunk: &Chunk) -> Result<()> {
        let mut edits = self.edits.lock().unwrap_or_else(PoisonError::into_inner);
        edits.entry(planet.chunk_index_of(loc)).or_default().insert(loc, material);
        Ok(())
    }
}

/// The authority's source: persisted chunks win over generated ones.
pub struct PersistentSource {
    store: Arc<WorldStore>,
    generator: TerrainGenerator,
}

impl PersistentSource {
    pub fn new(store: Arc<WorldStore>, generator: TerrainGenerator) -> Self {
        Self { store, generator }
    }
}

impl ChunkSource for PersistentSource {
    /// A storage failure is returned as is; it never falls through to the
    /// generator. Only a missing chunk is generated.
    fn load_chunk(&self, planet: &Planet, index: ChunkIndex) -> Result<Chunk> {
        if let Some(blob) = self.store.load_chunk(planet.id, index)? {
            debug!("Loaded chunk {:?} of planet {} from storage", index, planet.id);
            return Ok(blob.to_chunk(index));
        }
        let chunk = self.generator.generate_chunk(index);
        self.store.store_chunk(planet.id, index, &ChunkBlob::from_chunk(&chunk))?;
        Ok(chunk)
    }

    fn publish_edit(&self, planet: &Planet, _loc: CellLoc, _material: Material, chunk: &Chunk) -> Result<()> {
        self.store.store_chunk(planet.id, chunk.index, &ChunkBlob::from_chunk(chunk))
    }
}

/// Fetches chunks from, and submits edits to, a remote authority.
pub struct RemoteSource {
    client: Arc<WorldClient>,
}

impl RemoteSource {
    pub fn new(client: Arc<WorldClient>) -> Self {
        Self { client }
    }
}

impl ChunkSource for RemoteSource {
    fn load_chunk(&self, planet: &Planet, index: ChunkIndex) -> Result<Chunk> {
        self.client.fetch_chunk(planet.id, index)
    }

    fn publish_edit(&self, planet: &Planet, loc: CellLoc, material: Material, _chunk: &Chunk) -> Result<()> {
        self.client.submit_cell_edit(planet.id, loc, material)
    }
}
