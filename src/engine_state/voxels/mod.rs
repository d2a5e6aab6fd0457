//! # Voxel Engine Core
//!
//! This module contains the voxel world model of a spherical planet: how cells
//! are addressed, how terrain is generated, and how chunks are cached.
//!
//! ## Architecture
//!
//! The voxel system is organized into several key components:
//!
//! * **Coords / Planet**: Cell and chunk addressing, and the mapping between
//!   Cartesian space and the planet's (longitude, latitude, altitude) grid
//! * **Block**: Cell materials and the sides used for collision
//! * **Chunk**: Fixed 16x16x16 arrays of cells
//! * **Generator**: Deterministic terrain functions, looked up by key
//! * **Chunk Source**: Where missing chunks come from (storage, generator or
//!   remote authority) and where edits go
//! * **World**: The `ChunkStore` cache that ties it together
//! * **Tasks**: Asynchronous chunk population
//!
//! ## Data Flow
//!
//! 1. A caller asks the store for a cell or chunk
//! 2. The store returns a resident chunk or asks its source for one, on the
//!    calling thread or on a worker
//! 3. Edits are written into the resident chunk and published to the source
//! 4. Changed chunks are flagged `render_dirty` for whoever draws them
//!
//! ## Thread Safety
//!
//! * Chunks are shared as `MtResource<Chunk>`; readers take the read lock
//! * At most one population runs per chunk index
//! * A chunk enters the cache fully populated or not at all

pub mod block;
pub mod chunk;
pub mod chunk_source;
pub mod coords;
pub mod generator;
pub mod planet;
pub mod tasks;
pub mod world;
