//! # Grid Coordinates
//!
//! Index types for the spherical grid. A planet is addressed by
//! (longitude, latitude, altitude) instead of (x, y, z):
//!
//! * [`CellLoc`] - discrete index of one cell
//! * [`CellCoord`] - continuous position in cell units, used for collision planes
//! * [`ChunkIndex`] - discrete index of a `CHUNK_DIMENSION`³ block of cells
//!
//! The conversions that need planet parameters live on
//! [`Planet`](super::planet::Planet).

use std::ops::Add;

use serde::{Deserialize, Serialize};

use super::chunk::{CHUNK_DIMENSION, CHUNK_PLANE_SIZE};

/// Discrete (longitude, latitude, altitude) index of a cell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellLoc {
    pub lon: i32,
    pub lat: i32,
    pub alt: i32,
}

impl CellLoc {
    pub const fn new(lon: i32, lat: i32, alt: i32) -> Self {
        Self { lon, lat, alt }
    }

    /// The continuous coordinate of this cell's center.
    pub fn center(self) -> CellCoord {
        CellCoord::new(
            self.lon as f64 + 0.5,
            self.lat as f64 + 0.5,
            self.alt as f64 + 0.5,
        )
    }

    /// Offset of this cell inside its chunk's material array.
    ///
    /// Longitude runs fastest, then latitude, then altitude. The location must
    /// already be normalized into `[0, lon_cells)`.
    pub fn local_index(self) -> usize {
        let lon = self.lon.rem_euclid(CHUNK_DIMENSION);
        let lat = self.lat.rem_euclid(CHUNK_DIMENSION);
        let alt = self.alt.rem_euclid(CHUNK_DIMENSION);
        (lon + CHUNK_DIMENSION * lat + CHUNK_PLANE_SIZE * alt) as usize
    }
}

impl Add for CellLoc {
    type Output = CellLoc;

    fn add(self, rhs: CellLoc) -> CellLoc {
        CellLoc::new(self.lon + rhs.lon, self.lat + rhs.lat, self.alt + rhs.alt)
    }
}

/// Continuous spherical coordinate in cell units.
///
/// The integer part of each axis names a cell; cell `n` spans `[n, n + 1)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellCoord {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
}

impl CellCoord {
    pub const fn new(lon: f64, lat: f64, alt: f64) -> Self {
        Self { lon, lat, alt }
    }

    /// The cell containing this coordinate, without wrapping or clamping.
    pub fn floor(self) -> CellLoc {
        CellLoc::new(
            self.lon.floor() as i32,
            self.lat.floor() as i32,
            self.alt.floor() as i32,
        )
    }

    /// Shifts the coordinate by a (possibly fractional) number of cells.
    pub fn offset(self, lon: f64, lat: f64, alt: f64) -> CellCoord {
        CellCoord::new(self.lon + lon, self.lat + lat, self.alt + alt)
    }
}

/// Chunk-granularity (longitude, latitude, altitude) index.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkIndex {
    pub lon: i32,
    pub lat: i32,
    pub alt: i32,
}

impl ChunkIndex {
    pub const fn new(lon: i32, lat: i32, alt: i32) -> Self {
        Self { lon, lat, alt }
    }

    /// The chunk holding a cell, by integer division of each axis.
    ///
    /// Longitude must already be normalized so negative indices never reach
    /// the division.
    pub fn containing(loc: CellLoc) -> Self {
        ChunkIndex::new(
            loc.lon.div_euclid(CHUNK_DIMENSION),
            loc.lat.div_euclid(CHUNK_DIMENSION),
            loc.alt.div_euclid(CHUNK_DIMENSION),
        )
    }

    /// The first cell of this chunk.
    pub fn origin(self) -> CellLoc {
        CellLoc::new(
            self.lon * CHUNK_DIMENSION,
            self.lat * CHUNK_DIMENSION,
            self.alt * CHUNK_DIMENSION,
        )
    }

    /// Every cell of the chunk, in material-array order.
    pub fn cells(self) -> impl Iterator<Item = CellLoc> {
        let origin = self.origin();
        (0..CHUNK_DIMENSION).flat_map(move |alt| {
            (0..CHUNK_DIMENSION).flat_map(move |lat| {
                (0..CHUNK_DIMENSION)
                    .map(move |lon| origin + CellLoc::new(lon, lat, alt))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::chunk::CHUNK_SIZE;

    #[test]
    fn cells_follow_local_index_order() {
        let index = ChunkIndex::new(2, 1, 3);
        let cells: Vec<CellLoc> = index.cells().collect();
        assert_eq!(cells.len(), CHUNK_SIZE);
        for (offset, loc) in cells.iter().enumerate() {
            assert_eq!(loc.local_index(), offset);
            assert_eq!(ChunkIndex::containing(*loc), index);
        }
    }

    #[test]
    fn floor_handles_negative_coordinates() {
        let coord = CellCoord::new(-0.25, 3.99, 0.0);
        assert_eq!(coord.floor(), CellLoc::new(-1, 3, 0));
    }
}
