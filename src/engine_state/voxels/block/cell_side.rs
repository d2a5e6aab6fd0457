//! # Cell Side Module
//!
//! The neighbours of a cell that player collision tests against.

use crate::engine_state::voxels::coords::CellLoc;

/// A neighbour of a cell, named by the face the two cells share.
///
/// Collision only ever looks at the cell below the body and the four lateral
/// neighbours; the cell above never pushes the player.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum CellSide {
    /// One altitude step down.
    Below,
    LonPlus,
    LonMinus,
    LatPlus,
    LatMinus,
}

impl CellSide {
    /// All sides in the order collision resolves them.
    pub fn all() -> [CellSide; 5] {
        [
            CellSide::Below,
            CellSide::LonPlus,
            CellSide::LonMinus,
            CellSide::LatPlus,
            CellSide::LatMinus,
        ]
    }

    /// Index offset from a cell to the neighbour on this side.
    pub fn offset(self) -> CellLoc {
        match self {
            CellSide::Below => CellLoc::new(0, 0, -1),
            CellSide::LonPlus => CellLoc::new(1, 0, 0),
            CellSide::LonMinus => CellLoc::new(-1, 0, 0),
            CellSide::LatPlus => CellLoc::new(0, 1, 0),
            CellSide::LatMinus => CellLoc::new(0, -1, 0),
        }
    }

    /// Whether the shared face is horizontal, so the push-out runs along "up".
    pub fn is_vertical(self) -> bool {
        self == CellSide::Below
    }
}
