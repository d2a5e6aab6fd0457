#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Sphere World
//!
//! A voxel world engine where every planet is a sphere of cells addressed by
//! longitude, latitude and altitude.
//!
//! The crate runs in two roles. An authoritative server owns the planets of a
//! preset system, persists every edit and relays player interactions. A
//! client mirrors one planet through a chunk store fed either by the server
//! or, offline, by a local generator, and moves its player across it.
//!
//! ## Key Modules
//!
//! * `config` - Server and client settings, generator and preset registries
//! * `core` - Shared concurrency primitives
//! * `engine_state` - Grid addressing, generation, the chunk store, the
//!   player and the client frame loop
//! * `network` - The multiplexed TCP protocol, server and client
//! * `persistence` - On-disk planets, chunks and players
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sphere_world::config::{ClientConfig, Registries};
//! use sphere_world::engine_state::EngineState;
//!
//! sphere_world::init_logging();
//! let mut engine = EngineState::offline(&ClientConfig::default(), &Registries::builtin())?;
//! engine.run(Some(600))?;
//! # Ok::<(), sphere_world::error::WorldError>(())
//! ```

use log::info;

pub mod config;
pub mod core;
pub mod engine_state;
pub mod error;
pub mod network;
pub mod persistence;

/// Initializes `env_logger` on stdout, filtered by `RUST_LOG`.
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init_logging() {
    let mut log_builder = env_logger::Builder::new();
    let installed = log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .try_init()
        .is_ok();

    if installed {
        info!("Logger initialized");
    }
}
