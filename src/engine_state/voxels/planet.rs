//! # Planet Module
//!
//! A planet is a voxel grid wrapped onto a sphere. This module holds the
//! planet parameters and every conversion between Cartesian space and the
//! grid:
//!
//! ```text
//! Vector3 --cartesian_to_cell_coord--> CellCoord --cell_coord_to_cell_loc--> CellLoc
//!    ^                                                                          |
//!    +----------------------------- cell_loc_to_cartesian ---------------------+
//!                                                                  CellLoc --chunk_index_of--> ChunkIndex
//! ```
//!
//! ## Topology
//!
//! * Longitude wraps: index `lon_cells + k` is the same cell as `k`.
//! * Latitude is clamped: a position exactly on a pole lands in the boundary row.
//! * Altitude does not wrap: anything below the floor or above the ceiling is
//!   outside the planet and has no cell.
//!
//! Cell `(lon, lat, alt)` spans longitude `[lon, lon + 1) / lon_cells` of a full
//! turn, latitude `[lat, lat + 1) / lat_cells` of a half turn starting at the
//! south pole, and radius `radius + [alt, alt + 1) * alt_delta`.

use std::f64::consts::{PI, TAU};

use cgmath::{InnerSpace, Vector3};
use serde::{Deserialize, Serialize};

use super::chunk::CHUNK_DIMENSION;
use super::coords::{CellCoord, CellLoc, ChunkIndex};
use crate::error::{Result, WorldError};

/// Current version of the persisted planet record layout.
pub const PLANET_SCHEMA_VERSION: u32 = 1;

/// Placement of a planet relative to its parent. Voxel logic never reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    /// Planet this one circles; its own id for a stationary body.
    pub parent: u32,
    pub distance: f64,
    pub period_seconds: f64,
    pub rotation_seconds: f64,
}

/// Persisted description of a planet. Cell counts are derived on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanetRecord {
    pub schema_version: u32,
    pub id: u32,
    pub name: String,
    pub generator: String,
    pub radius: f64,
    pub alt_cells: i32,
    pub alt_delta: f64,
    pub seed: u32,
    pub orbit: Option<Orbit>,
}

/// Planet parameters plus the grid conversions that depend on them.
#[derive(Clone, Debug, PartialEq)]
pub struct Planet {
    pub id: u32,
    pub name: String,
    pub generator: String,
    pub radius: f64,
    pub lon_cells: i32,
    pub lat_cells: i32,
    pub alt_cells: i32,
    /// Radial thickness of one altitude step.
    pub alt_delta: f64,
    pub seed: u32,
    pub orbit: Option<Orbit>,
}

impl Planet {
    /// Builds a planet, deriving the horizontal resolution from the radius.
    ///
    /// Latitude gets roughly one cell per `alt_delta` of arc along a meridian,
    /// rounded to whole chunks; longitude gets twice as many so cells near the
    /// equator are roughly square.
    pub fn from_record(record: &PlanetRecord) -> Self {
        let alt_delta = if record.alt_delta > 0.0 { record.alt_delta } else { 1.0 };
        let chunks = (PI * record.radius / alt_delta / CHUNK_DIMENSION as f64).round() as i32;
        let lat_cells = chunks.max(1) * CHUNK_DIMENSION;
        Planet {
            id: record.id,
            name: record.name.clone(),
            generator: record.generator.clone(),
            radius: record.radius,
            lon_cells: 2 * lat_cells,
            lat_cells,
            alt_cells: record.alt_cells.max(1),
            alt_delta,
            seed: record.seed,
            orbit: record.orbit.clone(),
        }
    }

    pub fn to_record(&self) -> PlanetRecord {
        PlanetRecord {
            schema_version: PLANET_SCHEMA_VERSION,
            id: self.id,
            name: self.name.clone(),
            generator: self.generator.clone(),
            radius: self.radius,
            alt_cells: self.alt_cells,
            alt_delta: self.alt_delta,
            seed: self.seed,
            orbit: self.orbit.clone(),
        }
    }

    /// Radius of the top of the altitude band.
    pub fn outer_radius(&self) -> f64 {
        self.radius + self.alt_cells as f64 * self.alt_delta
    }

    /// Number of chunks along each axis. The altitude count rounds up; cells
    /// of the top chunk above `alt_cells` are Air.
    pub fn chunk_counts(&self) -> ChunkIndex {
        ChunkIndex::new(
            self.lon_cells / CHUNK_DIMENSION,
            self.lat_cells / CHUNK_DIMENSION,
            (self.alt_cells + CHUNK_DIMENSION - 1) / CHUNK_DIMENSION,
        )
    }

    /// Converts a Cartesian position to a continuous cell coordinate.
    ///
    /// Latitude comes from `atan2`, so the poles and the planet center produce
    /// finite values instead of NaN.
    pub fn cartesian_to_cell_coord(&self, pos: Vector3<f64>) -> CellCoord {
        let horizontal = pos.x.hypot(pos.y);
        let latitude = pos.z.atan2(horizontal);
        let mut longitude = pos.y.atan2(pos.x);
        if longitude < 0.0 {
            longitude += TAU;
        }
        CellCoord::new(
            longitude / TAU * self.lon_cells as f64,
            (latitude + PI / 2.0) / PI * self.lat_cells as f64,
            (pos.magnitude() - self.radius) / self.alt_delta,
        )
    }

    /// Converts a continuous coordinate to a Cartesian position. Longitude may
    /// lie outside `[0, lon_cells)`; the projection is periodic.
    pub fn cell_coord_to_cartesian(&self, coord: CellCoord) -> Vector3<f64> {
        let longitude = coord.lon / self.lon_cells as f64 * TAU;
        let latitude = coord.lat / self.lat_cells as f64 * PI - PI / 2.0;
        let r = self.radius + coord.alt * self.alt_delta;
        Vector3::new(
            r * latitude.cos() * longitude.cos(),
            r * latitude.cos() * longitude.sin(),
            r * latitude.sin(),
        )
    }

    /// The cell holding a continuous coordinate.
    ///
    /// # Returns
    /// `None` when the altitude is below the floor or at or above the ceiling.
    pub fn cell_coord_to_cell_loc(&self, coord: CellCoord) -> Option<CellLoc> {
        let loc = coord.floor();
        if loc.alt < 0 || loc.alt >= self.alt_cells {
            return None;
        }
        Some(CellLoc::new(
            loc.lon.rem_euclid(self.lon_cells),
            loc.lat.clamp(0, self.lat_cells - 1),
            loc.alt,
        ))
    }

    /// The cell holding a Cartesian position, if it is inside the planet.
    pub fn cartesian_to_cell_loc(&self, pos: Vector3<f64>) -> Option<CellLoc> {
        self.cell_coord_to_cell_loc(self.cartesian_to_cell_coord(pos))
    }

    /// Cartesian position of a cell's center.
    pub fn cell_loc_to_cartesian(&self, loc: CellLoc) -> Vector3<f64> {
        self.cell_coord_to_cartesian(loc.center())
    }

    /// Wraps longitude and checks latitude and altitude.
    pub fn normalize_cell_loc(&self, loc: CellLoc) -> Result<CellLoc> {
        if !(0..self.lat_cells).contains(&loc.lat) || !(0..self.alt_cells).contains(&loc.alt) {
            return Err(WorldError::OutOfRange(format!(
                "cell {loc:?} on planet {} ({} x {} x {})",
                self.id, self.lon_cells, self.lat_cells, self.alt_cells
            )));
        }
        Ok(CellLoc::new(loc.lon.rem_euclid(self.lon_cells), loc.lat, loc.alt))
    }

    /// Wraps longitude and checks latitude and altitude at chunk granularity.
    pub fn normalize_chunk_index(&self, index: ChunkIndex) -> Result<ChunkIndex> {
        let counts = self.chunk_counts();
        if !(0..counts.lat).contains(&index.lat) || !(0..counts.alt).contains(&index.alt) {
            return Err(WorldError::OutOfRange(format!(
                "chunk {index:?} on planet {} ({} x {} x {} chunks)",
                self.id, counts.lon, counts.lat, counts.alt
            )));
        }
        Ok(ChunkIndex::new(index.lon.rem_euclid(counts.lon), index.lat, index.alt))
    }

    /// The chunk holding a cell, wrapping longitude first.
    pub fn chunk_index_of(&self, loc: CellLoc) -> ChunkIndex {
        ChunkIndex::containing(CellLoc::new(
            loc.lon.rem_euclid(self.lon_cells),
            loc.lat,
            loc.alt,
        ))
    }

    /// Whether the cell lies inside the altitude band. Cells of the top chunk
    /// that fail this are Air.
    pub fn contains_altitude(&self, alt: i32) -> bool {
        (0..self.alt_cells).contains(&alt)
    }
}

#[cfg(test)]
pub(crate) fn test_planet(radius: f64, alt_cells: i32) -> Planet {
    Planet::from_record(&PlanetRecord {
        schema_version: PLANET_SCHEMA_VERSION,
        id: 0,
        name: "Test".to_string(),
        generator: "bumpy".to_string(),
        radius,
        alt_cells,
        alt_delta: 1.0,
        seed: 7,
        orbit: None,
    })
}
