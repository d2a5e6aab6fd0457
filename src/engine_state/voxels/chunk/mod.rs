//! # Chunk Module
//!
//! This module provides the `Chunk` struct: a dense 16x16x16 block of cell
//! materials, the unit of loading, persistence and render invalidation.
//!
//! ## Layout
//!
//! Materials are stored in one flat array with longitude running fastest,
//! then latitude, then altitude:
//!
//! ```text
//! offset = lon + CHUNK_DIMENSION * lat + CHUNK_PLANE_SIZE * alt
//! ```
//!
//! The array always holds exactly `CHUNK_SIZE` entries. A chunk that exists
//! is fully populated; there is no partially-initialized state to observe.

use chunk_creation::ChunkCreationIterator;

use super::block::material::Material;
use super::coords::{CellLoc, ChunkIndex};

pub mod chunk_creation;

/// The dimension (longitude, latitude and altitude extent) of a chunk in cells.
pub const CHUNK_DIMENSION: i32 = 16;
/// The number of cells in a single altitude layer of a chunk (CHUNK_DIMENSION²).
pub const CHUNK_PLANE_SIZE: i32 = CHUNK_DIMENSION * CHUNK_DIMENSION;
/// The total number of cells in a chunk (CHUNK_DIMENSION³).
pub const CHUNK_SIZE: usize = (CHUNK_PLANE_SIZE * CHUNK_DIMENSION) as usize;

/// A 16x16x16 block of cells on a planet.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    /// The chunk's position in chunk coordinates.
    pub index: ChunkIndex,
    materials: Vec<Material>,
    /// Set whenever a contained cell changes, and when the chunk first
    /// becomes resident. The rendering collaborator clears it after it has
    /// rebuilt the chunk's mesh.
    pub render_dirty: bool,
}

impl Chunk {
    /// Creates a chunk filled with air.
    pub fn empty(index: ChunkIndex) -> Self {
        let mut cci = ChunkCreationIterator::new(index);
        for _ in 0..CHUNK_SIZE {
            cci.push_material(Material::Air);
        }
        cci.return_chunk()
    }

    /// Builds a chunk by evaluating `material_of` for every cell in layout order.
    pub fn from_fn(index: ChunkIndex, mut material_of: impl FnMut(CellLoc) -> Material) -> Self {
        let mut cci = ChunkCreationIterator::new(index);
        for loc in index.cells() {
            cci.push_material(material_of(loc));
        }
        cci.return_chunk()
    }

    /// Wraps an already decoded material array.
    ///
    /// # Returns
    /// `None` unless the array holds exactly `CHUNK_SIZE` materials.
    pub fn from_materials(index: ChunkIndex, materials: Vec<Material>) -> Option<Self> {
        if materials.len() != CHUNK_SIZE {
            return None;
        }
        Some(Chunk {
            index,
            materials,
            render_dirty: false,
        })
    }

    /// The material of a cell inside this chunk.
    ///
    /// # Arguments
    /// * `loc` - A normalized cell location belonging to this chunk
    pub fn material(&self, loc: CellLoc) -> Material {
        self.materials[loc.local_index()]
    }

    /// Overwrites the material of a cell inside this chunk.
    ///
    /// # Returns
    /// The material the cell held before.
    pub fn set_material(&mut self, loc: CellLoc, material: Material) -> Material {
        std::mem::replace(&mut self.materials[loc.local_index()], material)
    }

    /// The full material array, in layout order.
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Number of non-air cells.
    pub fn solid_count(&self) -> usize {
        self.materials.iter().filter(|m| m.is_solid()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_material_returns_previous() {
        let index = ChunkIndex::new(1, 0, 2);
        let mut chunk = Chunk::empty(index);
        let loc = index.origin() + CellLoc::new(3, 4, 5);

        assert_eq!(chunk.set_material(loc, Material::Stone), Material::Air);
        assert_eq!(chunk.material(loc), Material::Stone);
        assert_eq!(chunk.solid_count(), 1);
        assert_eq!(chunk.materials()[3 + 16 * 4 + 256 * 5], Material::Stone);
    }

    #[test]
    fn from_materials_rejects_short_arrays() {
        let index = ChunkIndex::new(0, 0, 0);
        assert!(Chunk::from_materials(index, vec![Material::Air; CHUNK_SIZE - 1]).is_none());
        assert!(Chunk::from_materials(index, vec![Material::Air; CHUNK_SIZE]).is_some());
    }
}
