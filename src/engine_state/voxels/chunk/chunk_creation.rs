//! # Chunk Creation Module
//!
//! Builder used by every chunk constructor. Materials are pushed in layout
//! order (longitude fastest, then latitude, then altitude) and the builder
//! tracks the position of the next cell so generators and decoders never
//! compute offsets themselves.

use crate::engine_state::voxels::{block::material::Material, coords::ChunkIndex};

use super::{Chunk, CHUNK_DIMENSION, CHUNK_SIZE};

/// A builder that fills a chunk one cell at a time.
pub struct ChunkCreationIterator {
    /// The index of the chunk being created
    index: ChunkIndex,
    /// Materials pushed so far, in layout order
    materials: Vec<Material>,
    /// Current longitude within the chunk (0..CHUNK_DIMENSION)
    local_lon: i32,
    /// Current latitude within the chunk
    local_lat: i32,
    /// Current altitude within the chunk
    local_alt: i32,
}

impl ChunkCreationIterator {
    /// Creates a new `ChunkCreationIterator` for the chunk at `index`.
    pub fn new(index: ChunkIndex) -> Self {
        ChunkCreationIterator {
            index,
            materials: Vec::with_capacity(CHUNK_SIZE),
            local_lon: 0,
            local_lat: 0,
            local_alt: 0,
        }
    }

    /// Finalizes the chunk.
    ///
    /// Cells that were never pushed are Air, so the returned chunk always
    /// holds `CHUNK_SIZE` materials. A new chunk starts render-dirty.
    pub fn return_chunk(mut self) -> Chunk {
        self.materials.resize(CHUNK_SIZE, Material::Air);
        Chunk {
            index: self.index,
            materials: self.materials,
            render_dirty: true,
        }
    }

    /// Whether every cell of the chunk has been pushed.
    pub fn is_complete(&self) -> bool {
        self.materials.len() == CHUNK_SIZE
    }

    /// Adds the material of the current cell and advances to the next one.
    ///
    /// Pushes past the end of the chunk are ignored.
    pub fn push_material(&mut self, material: Material) {
        if self.is_complete() {
            return;
        }
        self.materials.push(material);

        // Move to the next position
        self.local_lon += 1;
        if self.local_lon == CHUNK_DIMENSION {
            self.local_lon = 0;
            self.local_lat += 1;
            if self.local_lat == CHUNK_DIMENSION {
                self.local_lat = 0;
                self.local_alt += 1;
            }
        }
    }

    /// Local (lon, lat, alt) of the cell the next push fills.
    pub fn cursor(&self) -> (i32, i32, i32) {
        (self.local_lon, self.local_lat, self.local_alt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances_longitude_first() {
        let mut cci = ChunkCreationIterator::new(ChunkIndex::new(0, 0, 0));
        for _ in 0..CHUNK_DIMENSION {
            cci.push_material(Material::Dirt);
        }
        assert_eq!(cci.cursor(), (0, 1, 0));
        for _ in 0..(CHUNK_DIMENSION * (CHUNK_DIMENSION - 1)) {
            cci.push_material(Material::Dirt);
        }
        assert_eq!(cci.cursor(), (0, 0, 1));
    }

    #[test]
    fn short_builds_are_padded_with_air() {
        let mut cci = ChunkCreationIterator::new(ChunkIndex::new(0, 0, 0));
        cci.push_material(Material::Grass);
        assert!(!cci.is_complete());
        let chunk = cci.return_chunk();
        assert_eq!(chunk.materials().len(), CHUNK_SIZE);
        assert_eq!(chunk.solid_count(), 1);
        assert!(chunk.render_dirty);
    }
}
