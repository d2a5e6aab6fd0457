//! # Block Module
//!
//! Per-cell definitions: the material enumeration and the cell neighbourhood
//! used by collision.

pub mod cell_side;
pub mod material;

/// The underlying integer type used to store a material.
pub type MaterialSize = u8;
