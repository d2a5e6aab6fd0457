//! # Runtime Configuration
//!
//! Server and client settings, loadable from a JSON file and overridable from
//! the command line, plus the [`Registries`] value that carries the generator
//! and preset tables to the components that need them.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::engine_state::voxels::generator::{GeneratorRegistry, SystemPresets};
use crate::error::{Result, WorldError};

fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(|count| count.get().clamp(1, 8))
        .unwrap_or(2)
}

/// Deadline and retry policy for calls to a remote peer.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RpcConfig {
    /// Deadline for a single attempt.
    pub timeout_ms: u64,
    /// Attempts made for an idempotent call before giving up.
    pub max_attempts: u32,
    /// First backoff delay; doubled after every failed attempt.
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff delay.
    pub backoff_max_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_attempts: 4,
            backoff_base_ms: 50,
            backoff_max_ms: 2_000,
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings for the authoritative world server.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub data_dir: PathBuf,
    /// System preset used to create planets that are not yet persisted.
    pub system: String,
    pub world_seed: u32,
    pub max_resident_chunks: usize,
    pub worker_threads: usize,
    pub rpc: RpcConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5555".to_string(),
            data_dir: PathBuf::from("saves/world"),
            system: "planet".to_string(),
            world_seed: 1337,
            max_resident_chunks: 8192,
            worker_threads: default_worker_threads(),
            rpc: RpcConfig::default(),
        }
    }
}

/// Settings for a client process.
///
/// Without a `server` address the client runs offline against a locally
/// generated copy of the preset world.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub server: Option<String>,
    pub player_name: String,
    pub planet_id: u32,
    pub system: String,
    pub world_seed: u32,
    pub max_resident_chunks: usize,
    pub worker_threads: usize,
    /// Chunk radius kept loaded around the player.
    pub render_distance: i32,
    pub target_fps: u32,
    pub rpc: RpcConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            player_name: "player".to_string(),
            planet_id: 0,
            system: "planet".to_string(),
            world_seed: 1337,
            max_resident_chunks: 4096,
            worker_threads: default_worker_threads(),
            render_distance: 4,
            target_fps: 60,
            rpc: RpcConfig::default(),
        }
    }
}

/// Reads a JSON config file, or returns the defaults when no path is given.
/// Missing fields fall back to their defaults.
///
/// # Errors
/// `Config` naming the file if it cannot be read or parsed.
pub fn load_config<T>(path: Option<&Path>) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = fs::read_to_string(path)
        .map_err(|err| WorldError::Config(format!("cannot read {}: {err}", path.display())))?;
    serde_json::from_str(&text).map_err(|err| WorldError::Config(format!("{}: {err}", path.display())))
}

/// Generator and preset tables, built once at startup and passed by reference.
pub struct Registries {
    pub generators: GeneratorRegistry,
    pub presets: SystemPresets,
}

impl Registries {
    /// The built-in generators and system presets.
    pub fn builtin() -> Self {
        Self {
            generators: GeneratorRegistry::builtin(),
            presets: SystemPresets::builtin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::tests::test_root;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{ "system": "moon", "rpc": { "timeout_ms": 250 } }"#).unwrap();
        assert_eq!(config.system, "moon");
        assert_eq!(config.rpc.timeout_ms, 250);
        assert_eq!(config.rpc.max_attempts, RpcConfig::default().max_attempts);
        assert_eq!(config.bind, ServerConfig::default().bind);
    }

    #[test]
    fn missing_path_yields_defaults() {
        let config: ClientConfig = load_config(None).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.target_fps, 60);
    }

    #[test]
    fn unreadable_or_invalid_files_are_config_errors() {
        let dir = test_root("config");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("server.json");

        match load_config::<ServerConfig>(Some(&path)) {
            Err(WorldError::Config(message)) => assert!(message.contains("server.json")),
            other => panic!("unexpected outcome: {:?}", other.map(|config| config.bind)),
        }
        fs::write(&path, r#"{ "system": 7 "#).unwrap();
        assert!(matches!(load_config::<ServerConfig>(Some(&path)), Err(WorldError::Config(_))));
        fs::write(&path, r#"{ "system": "moon" }"#).unwrap();
        assert_eq!(load_config::<ServerConfig>(Some(&path)).unwrap().system, "moon");

        fs::remove_dir_all(dir).unwrap();
    }
}
