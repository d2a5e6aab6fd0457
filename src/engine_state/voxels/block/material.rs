//! # Material Module
//!
//! This module defines the substances a cell can hold and their compact
//! integer encoding used by chunk blobs.

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::MaterialSize;

/// Enumerates every material a cell can hold.
///
/// The discriminants are the on-disk and on-wire encoding of a cell; new
/// variants must be appended, never reordered.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Material {
    /// Empty space. Every cell outside a planet's altitude band is Air.
    #[default]
    Air = 0,
    Grass = 1,
    Dirt = 2,
    Stone = 3,
    /// Player-placed building material.
    Rock = 4,
    Moon = 5,
    Sun = 6,
    RedBlock = 7,
    YellowBlock = 8,
    GreenBlock = 9,
    BlueBlock = 10,
    WhiteBlock = 11,
}

impl Material {
    /// Decodes a stored material identifier.
    ///
    /// # Returns
    /// `None` for identifiers no variant uses, so a corrupt blob can be
    /// reported instead of guessed at.
    pub fn from_id(id: MaterialSize) -> Option<Self> {
        num::FromPrimitive::from_u8(id)
    }

    /// The stored identifier of this material.
    pub fn id(self) -> MaterialSize {
        self as MaterialSize
    }

    /// Whether the material blocks movement and stops the focus ray.
    pub fn is_solid(self) -> bool {
        self != Material::Air
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_decode_to_their_variant() {
        for id in 0..=11u8 {
            let material = Material::from_id(id).unwrap();
            assert_eq!(material.id(), id);
        }
        assert_eq!(Material::from_id(12), None);
        assert_eq!(Material::from_id(255), None);
    }

    #[test]
    fn only_air_is_passable() {
        assert!(!Material::Air.is_solid());
        assert!(Material::Stone.is_solid());
        assert!(Material::BlueBlock.is_solid());
    }
}
