//! # Sphere World Entry Point
//!
//! Runs either the authoritative world server or a client.
//!
//! ## Usage
//!
//! ```bash
//! sphere-world server --bind 0.0.0.0:5555 --data-dir saves/world
//! sphere-world client --server 127.0.0.1:5555 --name alice
//! sphere-world client --frames 600
//! ```
//!
//! A client without `--server` runs offline on a locally generated planet.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use sphere_world::config::{load_config, ClientConfig, Registries, ServerConfig};
use sphere_world::engine_state::EngineState;
use sphere_world::error::{Result, WorldError};
use sphere_world::network::WorldServer;

#[derive(Parser)]
#[command(version, about = "Spherical voxel world server and client")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Serve a world to remote clients
    Server {
        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
        /// Directory holding planets, chunks and players
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Preset system to create on first start
        #[arg(long)]
        system: Option<String>,
    },
    /// Play on a server, or offline when no server is given
    Client {
        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,
        /// `host:port` of the server
        #[arg(long)]
        server: Option<String>,
        /// Player name
        #[arg(long)]
        name: Option<String>,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
    },
}

fn run_server(
    config: Option<PathBuf>,
    bind: Option<String>,
    data_dir: Option<PathBuf>,
    system: Option<String>,
) -> Result<()> {
    let mut config: ServerConfig = load_config(config.as_deref())?;
    if let Some(bind) = bind {
        config.bind = bind;
    }
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }
    if let Some(system) = system {
        config.system = system;
    }

    let server = WorldServer::open(&config, &Registries::builtin())?;
    let listener = TcpListener::bind(&config.bind)
        .map_err(|err| WorldError::Transport(format!("cannot listen on {}: {err}", config.bind)))?;
    let handle = server.serve(listener)?;
    info!("Serving {} planets on {}", server.planet_ids().len(), handle.local_addr());
    handle.join();
    Ok(())
}

fn run_client(
    config: Option<PathBuf>,
    server: Option<String>,
    name: Option<String>,
    frames: Option<u64>,
) -> Result<()> {
    let mut config: ClientConfig = load_config(config.as_deref())?;
    if server.is_some() {
        config.server = server;
    }
    if let Some(name) = name {
        config.player_name = name;
    }

    let registries = Registries::builtin();
    let mut engine = match config.server.clone() {
        Some(addr) => EngineState::connect(&addr, &config)?,
        None => EngineState::offline(&config, &registries)?,
    };
    engine.run(frames)?;
    info!("Stopped after {} frames", engine.frame_count());
    Ok(())
}

fn main() -> ExitCode {
    sphere_world::init_logging();

    let outcome = match Cli::parse().role {
        Role::Server {
            config,
            bind,
            data_dir,
            system,
        } => run_server(config, bind, data_dir, system),
        Role::Client {
            config,
            server,
            name,
            frames,
        } => run_client(config, server, name, frames),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
