use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use sphere_world::config::{Registries, RpcConfig, ServerConfig};
use sphere_world::engine_state::player::PlayerState;
use sphere_world::engine_state::voxels::block::material::Material;
use sphere_world::engine_state::voxels::coords::{CellLoc, ChunkIndex};
use sphere_world::error::WorldError;
use sphere_world::network::{ServerHandle, WorldClient, WorldServer};

fn data_dir(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("sphere-world-it-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&path);
    path
}

fn start(dir: &Path) -> ServerHandle {
    let config = ServerConfig {
        bind: "127.0.0.1:0".to_string(),
        data_dir: dir.to_path_buf(),
        worker_threads: 1,
        ..ServerConfig::default()
    };
    let server = WorldServer::open(&config, &Registries::builtin()).unwrap();
    let listener = TcpListener::bind(&config.bind).unwrap();
    server.serve(listener).unwrap()
}

fn connect(handle: &ServerHandle, name: &str) -> std::sync::Arc<WorldClient> {
    let client = WorldClient::connect(
        &handle.local_addr().to_string(),
        PlayerState::new(name.to_string()),
        RpcConfig::default(),
    )
    .unwrap();
    wait_for(|| handle.server().player_names().iter().any(|joined| joined == name));
    client
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(10));
    }
}

fn material_at(client: &WorldClient, loc: CellLoc) -> Material {
    let chunk = client.fetch_chunk(0, ChunkIndex::containing(loc)).unwrap();
    chunk.material(loc)
}

#[test]
fn acknowledged_edits_survive_restarts() {
    let dir = data_dir("edits");
    let loc = CellLoc::new(5, 5, 60);

    let handle = start(&dir);
    let client = connect(&handle, "builder");
    assert_eq!(material_at(&client, loc), Material::Air);
    client.submit_cell_edit(0, loc, Material::Stone).unwrap();
    // Repeating an edit changes nothing.
    client.submit_cell_edit(0, loc, Material::Stone).unwrap();
    drop(client);
    handle.shutdown();

    let handle = start(&dir);
    let client = connect(&handle, "builder");
    assert_eq!(material_at(&client, loc), Material::Stone);
    client.submit_cell_edit(0, loc, Material::Air).unwrap();
    drop(client);
    handle.shutdown();

    let handle = start(&dir);
    let client = connect(&handle, "builder");
    assert_eq!(material_at(&client, loc), Material::Air);
    drop(client);
    handle.shutdown();

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn saved_player_state_is_pushed_on_reconnect() {
    let dir = data_dir("players");
    let handle = start(&dir);

    let client = connect(&handle, "wanderer");
    assert_eq!(client.take_state_correction(), None);
    let mut state = PlayerState::new("wanderer".to_string());
    state.health = 7;
    state.position = [1.0, 2.0, 3.0];
    client.save_player_state(&state).unwrap();
    client.close();
    drop(client);
    wait_for(|| handle.server().player_names().is_empty());
    handle.shutdown();

    let handle = start(&dir);
    let client = connect(&handle, "wanderer");
    let mut restored = None;
    wait_for(|| {
        restored = client.take_state_correction();
        restored.is_some()
    });
    assert_eq!(restored, Some(state));
    drop(client);
    handle.shutdown();

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn hits_reach_the_target_player() {
    let dir = data_dir("hits");
    let handle = start(&dir);
    let attacker = connect(&handle, "attacker");
    let target = connect(&handle, "target");

    attacker.hit_player("target", 3).unwrap();
    let events = target.take_damage_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].from, "attacker");
    assert_eq!(events[0].amount, 3);
    assert!(attacker.take_damage_events().is_empty());

    assert!(matches!(attacker.hit_player("nobody", 1), Err(WorldError::Remote(_))));
    assert!(matches!(attacker.hit_player("target", -4), Err(WorldError::Remote(_))));
    assert!(matches!(attacker.hit_player("target", i32::MIN), Err(WorldError::Remote(_))));
    assert!(target.take_damage_events().is_empty());

    drop(attacker);
    drop(target);
    handle.shutdown();
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unknown_planets_are_rejected() {
    let dir = data_dir("planets");
    let handle = start(&dir);
    let client = connect(&handle, "explorer");

    let record = client.get_planet(0).unwrap();
    assert_eq!(record.id, 0);
    assert!(matches!(client.get_planet(42), Err(WorldError::Remote(_))));
    assert!(matches!(
        client.submit_cell_edit(42, CellLoc::new(0, 0, 0), Material::Stone),
        Err(WorldError::Remote(_))
    ));

    drop(client);
    handle.shutdown();
    let _ = fs::remove_dir_all(&dir);
}
