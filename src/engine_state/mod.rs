//! # Engine State Module
//!
//! The client-side engine: the chunk store of the planet the player is on,
//! the player, and the optional link to an authoritative server, driven by a
//! fixed-rate frame loop.
//!
//! ## Key Components
//!
//! * `EngineState` - The main state container, advanced once per frame
//! * `FrameClock` - Frame timing with sleep padding to the target rate
//! * `player` - Player state, look control and physics
//! * `task_management` - Worker pool for asynchronous chunk population
//! * `voxels` - Cell addressing, generation and the chunk store
//!
//! ## Frame
//!
//! Each frame runs, in order:
//! 1. Server input: authoritative state corrections and damage
//! 2. Player input and physics, then cell edits at the focus
//! 3. Task results from the worker pool
//! 4. Handing dirty chunks to the renderer
//!
//! Nothing in a frame blocks on chunk population or on publishing edits: the
//! player reads the store with `allow_async`, chunks appear in later frames as
//! workers finish, and edits are submitted to the workers.

pub mod player;
pub mod task_management;
pub mod voxels;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use web_time::Instant;

use crate::config::{ClientConfig, Registries};
use crate::error::{Result, WorldError};
use crate::network::WorldClient;
use player::{Player, PlayerIntent, PlayerState};
use voxels::{
    block::material::Material,
    chunk_source::{ChunkSource, GeneratedSource, RemoteSource},
    planet::Planet,
    world::{ChunkStore, StoreOptions},
};

/// Paces the frame loop to a target rate.
#[derive(Debug)]
pub struct FrameClock {
    frame_duration: Duration,
    last_tick: Instant,
}

impl FrameClock {
    pub fn new(target_fps: u32) -> Self {
        Self {
            frame_duration: Duration::from_secs(1) / target_fps.max(1),
            last_tick: Instant::now(),
        }
    }

    /// Starts a frame.
    ///
    /// # Returns
    /// Seconds since the previous frame started.
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick);
        self.last_tick = now;
        dt.as_secs_f64()
    }

    /// Time left before the current frame's budget runs out.
    pub fn remaining(&self) -> Duration {
        self.frame_duration.saturating_sub(self.last_tick.elapsed())
    }

    /// Sleeps out the rest of the frame budget.
    pub fn pad(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }
}

/// The client engine: world view, player and server link.
pub struct EngineState {
    /// Chunks of the planet the player is on
    pub store: Arc<ChunkStore>,
    /// The local player
    pub player: Player,
    /// Link to the authority; `None` when running offline
    pub client: Option<Arc<WorldClient>>,
    /// Input for the next frame
    pub intent: PlayerIntent,
    clock: FrameClock,
    frames: u64,
}

impl EngineState {
    /// Builds an engine over `store` and spawns the player on it.
    pub fn new(store: Arc<ChunkStore>, mut player: Player, client: Option<Arc<WorldClient>>, target_fps: u32) -> Self {
        player.spawn(&store);
        EngineState {
            store,
            player,
            client,
            intent: PlayerIntent::default(),
            clock: FrameClock::new(target_fps),
            frames: 0,
        }
    }

    /// An engine with no server: the configured preset planet is generated
    /// locally and edits stay in memory.
    pub fn offline(config: &ClientConfig, registries: &Registries) -> Result<Self> {
        let descriptor = registries
            .presets
            .get(&config.system)
            .and_then(|planets| planets.iter().find(|planet| planet.id == config.planet_id))
            .ok_or_else(|| {
                WorldError::OutOfRange(format!(
                    "system '{}' has no planet {}",
                    config.system, config.planet_id
                ))
            })?;
        let planet = Planet::from_record(&descriptor.to_record(config.world_seed));
        let generator = registries.generators.bind(&planet)?;
        info!("Running offline on planet {} '{}'", planet.id, planet.name);
        let store = Self::store_for(config, planet, Box::new(GeneratedSource::new(generator)));
        let player = Player::new(config.player_name.clone(), config.render_distance);
        Ok(Self::new(store, player, None, config.target_fps))
    }

    /// An engine mirroring the planet of a remote authority.
    ///
    /// The planet parameters come from the server; chunks are fetched and
    /// edits submitted through the connection.
    pub fn connect(addr: &str, config: &ClientConfig) -> Result<Self> {
        let client = WorldClient::connect(addr, PlayerState::new(config.player_name.clone()), config.rpc.clone())?;
        let planet = Planet::from_record(&client.get_planet(config.planet_id)?);
        info!("Joined planet {} '{}' on {}", planet.id, planet.name, addr);
        let store = Self::store_for(config, planet, Box::new(RemoteSource::new(client.clone())));
        let player = Player::new(config.player_name.clone(), config.render_distance);
        Ok(Self::new(store, player, Some(client), config.target_fps))
    }

    fn store_for(config: &ClientConfig, planet: Planet, source: Box<dyn ChunkSource>) -> Arc<ChunkStore> {
        let options = StoreOptions {
            max_resident_chunks: config.max_resident_chunks,
            worker_threads: config.worker_threads,
        };
        Arc::new(ChunkStore::new(planet, source, options))
    }

    /// Processes completed and queued tasks.
    ///
    /// # Returns
    /// Number of finished populations handled.
    pub fn process_tasks(&mut self) -> usize {
        self.store.process_completed_tasks()
    }

    /// Applies what the server sent since the last frame.
    pub fn process_network(&mut self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        if let Some(state) = client.take_state_correction() {
            debug!("Applying server state for {}", state.name);
            self.player.apply_state(&state);
        }
        for event in client.take_damage_events() {
            info!("{} hit {} for {}", event.from, self.player.name, event.amount);
            self.player.take_damage(event.amount, &self.store);
        }
    }

    /// Runs the current intent through the player and performs requested
    /// edits. Edge-triggered intent flags are cleared afterwards.
    pub fn process_input(&mut self, dt: f64) {
        self.player.apply_intent(&self.intent);
        self.player.update_position(&self.store, dt);

        if self.intent.break_cell {
            if let Err(err) = self.break_focused_cell() {
                warn!("Could not break cell: {}", err);
            }
        }
        if self.intent.place_cell {
            if let Err(err) = self.place_at_focused_cell() {
                warn!("Could not place cell: {}", err);
            }
        }

        self.intent.toggle_game_mode = false;
        self.intent.swivel = None;
        self.intent.break_cell = false;
        self.intent.place_cell = false;
        self.intent.select_material = None;
    }

    /// Clears the solid cell under the crosshair.
    ///
    /// The edit shows locally at once and reaches the source on the task
    /// workers; a rejected edit is rolled back there.
    ///
    /// # Returns
    /// Whether a cell was changed.
    pub fn break_focused_cell(&mut self) -> Result<bool> {
        match self.player.focus_target(&self.store) {
            Some(target) => self.store.submit_cell_material(target.cell, Material::Air),
            None => Ok(false),
        }
    }

    /// Fills the empty cell in front of the solid cell under the crosshair
    /// with the player's held material. Published like `break_focused_cell`.
    ///
    /// # Returns
    /// Whether a cell was changed.
    pub fn place_at_focused_cell(&mut self) -> Result<bool> {
        match self.player.focus_target(&self.store).and_then(|target| target.before) {
            Some(cell) => self.store.submit_cell_material(cell, self.player.held_material),
            None => Ok(false),
        }
    }

    /// Hands every dirty chunk to the renderer. Without a renderer attached
    /// the chunks are only counted.
    ///
    /// # Returns
    /// Number of chunks presented.
    pub fn present_dirty_chunks(&mut self) -> usize {
        let dirty = self.store.dirty_chunks();
        for index in &dirty {
            self.store.clear_render_dirty(*index);
        }
        if !dirty.is_empty() {
            debug!("Presented {} chunks", dirty.len());
        }
        dirty.len()
    }

    /// Advances the engine by one frame of `dt` seconds.
    pub fn frame(&mut self, dt: f64) {
        self.process_network();
        self.process_input(dt);
        self.process_tasks();
        self.present_dirty_chunks();
        if let Some(client) = &self.client {
            client.update_snapshot(self.player.to_state());
        }
        self.frames += 1;
    }

    /// Runs the frame loop at the target rate, for `frames` frames or until
    /// the server connection drops. Saves the player's state on the way out.
    pub fn run(&mut self, frames: Option<u64>) -> Result<()> {
        self.clock.tick();
        loop {
            if frames.is_some_and(|limit| self.frames >= limit) {
                break;
            }
            if self.client.as_ref().is_some_and(|client| !client.is_connected()) {
                warn!("Lost connection to the server");
                break;
            }
            let dt = self.clock.tick();
            self.frame(dt);
            self.clock.pad();
        }
        self.save_player_state()
    }

    /// Stores the player's state on the server. Does nothing offline.
    pub fn save_player_state(&self) -> Result<()> {
        match &self.client {
            Some(client) if client.is_connected() => client.save_player_state(&self.player.to_state()),
            _ => Ok(()),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::planet::test_planet;

    fn small_engine() -> EngineState {
        let mut planet = test_planet(16.0, 32);
        planet.generator = "sphere".to_string();
        let generator = Registries::builtin().generators.bind(&planet).unwrap();
        let store = Arc::new(ChunkStore::new(
            planet,
            Box::new(GeneratedSource::new(generator)),
            StoreOptions::default(),
        ));
        EngineState::new(store, Player::new("p", 1), None, 60)
    }

    fn settle(engine: &mut EngineState) {
        for _ in 0..100 {
            engine.frame(0.05);
        }
    }

    #[test]
    fn frame_clock_pads_to_target_rate() {
        let mut clock = FrameClock::new(100);
        assert_eq!(clock.frame_duration(), Duration::from_millis(10));
        clock.tick();
        clock.pad();
        assert!(clock.tick() >= 0.0099);
        assert!(clock.remaining() <= Duration::from_millis(10));
    }

    #[test]
    fn offline_engine_spawns_on_the_preset_planet() {
        let config = ClientConfig {
            render_distance: 1,
            ..ClientConfig::default()
        };
        let engine = EngineState::offline(&config, &Registries::builtin()).unwrap();
        assert_eq!(engine.store.planet().id, 0);
        assert!(engine.player.position.x > engine.store.planet().radius);
        assert!(engine.client.is_none());

        let missing = ClientConfig {
            planet_id: 99,
            ..config
        };
        assert!(matches!(
            EngineState::offline(&missing, &Registries::builtin()),
            Err(WorldError::OutOfRange(_))
        ));
    }

    #[test]
    fn break_and_place_edit_the_focused_cell() {
        let mut engine = small_engine();
        settle(&mut engine);
        engine.intent.swivel = Some((0.0, 10_000.0));
        engine.frame(0.05);

        let target = engine.player.focus_target(&engine.store).unwrap();
        let above = target.before.unwrap();

        assert!(engine.place_at_focused_cell().unwrap());
        assert_eq!(
            engine.store.cell_material(above, false).unwrap(),
            Some(player::DEFAULT_HELD_MATERIAL)
        );

        let placed = engine.player.focus_target(&engine.store).unwrap();
        assert_eq!(placed.cell, above);
        engine.intent.break_cell = true;
        engine.frame(0.0);
        assert_eq!(engine.store.cell_material(above, false).unwrap(), Some(Material::Air));
        assert!(!engine.intent.break_cell);
    }

    #[test]
    fn frames_present_and_clear_dirty_chunks() {
        let mut engine = small_engine();
        engine.frame(0.0);
        assert!(engine.store.dirty_chunks().is_empty());
        assert_eq!(engine.present_dirty_chunks(), 0);
        assert_eq!(engine.frame_count(), 1);
    }

    #[test]
    fn run_stops_after_the_frame_limit() {
        let mut engine = small_engine();
        engine.run(Some(3)).unwrap();
        assert_eq!(engine.frame_count(), 3);
    }

    #[test]
    fn placing_uses_the_selected_material() {
        let mut engine = small_engine();
        settle(&mut engine);
        engine.intent.swivel = Some((0.0, 10_000.0));
        engine.intent.select_material = Some(Material::GreenBlock);
        engine.intent.place_cell = true;
        engine.frame(0.0);

        let placed = engine.player.focus_target(&engine.store).unwrap().cell;
        assert_eq!(engine.store.cell_material(placed, false).unwrap(), Some(Material::GreenBlock));
        assert_eq!(engine.intent.select_material, None);
        assert_eq!(engine.player.held_material, Material::GreenBlock);
    }
}
