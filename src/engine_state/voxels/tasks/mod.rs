//! # Voxel Task System
//!
//! Tasks the chunk store hands to the worker pool so that populating a chunk
//! (generation, storage reads, remote fetches) and publishing edits never
//! block the frame loop.

pub mod cell_edit_task;
pub mod chunk_population_task;
