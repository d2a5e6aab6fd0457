//! # Player State Management
//!
//! This module holds everything about the local player that is not physics:
//! the persisted [`PlayerState`] record, look control, health and respawn,
//! and keeping the chunks around the player loaded.
//!
//! ## Core Components
//! - `Player`: The live player, owned by the frame loop
//! - `PlayerState`: The serializable snapshot exchanged with the authority
//!   and stored in the player table
//! - `PlayerIntent`: One frame of input, produced by whatever drives the player
//! - [`physics`]: Movement integration, collision and the focus ray march
//!
//! ## Orientation
//!
//! The player's "up" is always the normalized position: the direction away
//! from the planet's center. The look direction is stored as a heading in the
//! tangent plane plus an altitude angle above that plane, which keeps the
//! horizon level however far the player walks around the sphere.

pub mod physics;

use cgmath::{InnerSpace, Quaternion, Rad, Rotation, Rotation3, Vector3, Zero};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::voxels::{
    block::material::Material,
    coords::{CellLoc, ChunkIndex},
    world::ChunkStore,
};

/// Current version of the persisted player record layout.
pub const PLAYER_SCHEMA_VERSION: u32 = 1;

/// Health a player spawns with; healing never exceeds it.
pub const MAX_HEALTH: i32 = 10;

/// Walking speed in world units per second.
pub const WALK_VELOCITY: f64 = 5.0;
/// Eye height above the feet.
pub const PLAYER_HEIGHT: f64 = 2.0;
/// Horizontal clearance kept from walls.
pub const PLAYER_RADIUS: f64 = 0.25;
/// Distance above the planet's outer radius where a spawn search starts.
pub const SPAWN_CLEARANCE: f64 = 5.0;
/// What a new player places until it selects something else.
pub const DEFAULT_HELD_MATERIAL: Material = Material::Rock;

/// Movement rules the player is under.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Gravity, jumping and collision.
    #[default]
    Normal,
    /// Free movement along the look direction, no collision.
    Flying,
}

impl GameMode {
    pub fn toggled(self) -> Self {
        match self {
            GameMode::Normal => GameMode::Flying,
            GameMode::Flying => GameMode::Normal,
        }
    }
}

/// Serializable snapshot of a player, as stored in the player table and sent
/// over the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub schema_version: u32,
    pub name: String,
    pub position: [f64; 3],
    pub look_heading: [f64; 3],
    /// Degrees above the tangent plane.
    pub look_altitude: f64,
    pub health: i32,
    pub game_mode: GameMode,
}

impl PlayerState {
    /// A fresh player that has not spawned yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema_version: PLAYER_SCHEMA_VERSION,
            name: name.into(),
            position: [0.0; 3],
            look_heading: [0.0, 1.0, 0.0],
            look_altitude: 0.0,
            health: MAX_HEALTH,
            game_mode: GameMode::Normal,
        }
    }
}

/// One frame of player input.
///
/// Movement flags are levels (held keys); `toggle_game_mode`, `break_cell`,
/// `place_cell` and `select_material` are edges and fire once per frame they
/// are set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerIntent {
    pub move_forward: bool,
    pub move_backward: bool,
    pub move_left: bool,
    pub move_right: bool,
    pub move_up: bool,
    pub move_down: bool,
    pub jump: bool,
    pub toggle_game_mode: bool,
    /// Cursor movement since the last frame.
    pub swivel: Option<(f64, f64)>,
    pub break_cell: bool,
    pub place_cell: bool,
    /// New material for the player's hand, e.g. from a hotbar slot.
    pub select_material: Option<Material>,
}

/// Velocity components requested by the input, each non-negative.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Movement {
    pub up: f64,
    pub down: f64,
    pub forward: f64,
    pub back: f64,
    pub right: f64,
    pub left: f64,
}

/// The local player.
#[derive(Clone, Debug)]
pub struct Player {
    pub name: String,
    /// Eye position in planet-centered Cartesian coordinates.
    pub position: Vector3<f64>,
    look_heading: Vector3<f64>,
    look_altitude: f64,
    pub health: i32,
    pub game_mode: GameMode,
    pub movement: Movement,
    /// Radial velocity; negative while falling.
    pub fall_velocity: f64,
    pub holding_jump: bool,
    in_jump: bool,
    /// Chunk radius kept loaded around the feet.
    pub render_distance: i32,
    /// Solid cell under the crosshair, refreshed every physics step.
    pub focus: Option<CellLoc>,
    /// Material placed by the player.
    pub held_material: Material,
}

impl Player {
    pub fn new(name: impl Into<String>, render_distance: i32) -> Self {
        Self::from_state(&PlayerState::new(name), render_distance)
    }

    /// Restores a player from a stored or pushed snapshot.
    pub fn from_state(state: &PlayerState, render_distance: i32) -> Self {
        let mut player = Player {
            name: state.name.clone(),
            position: Vector3::zero(),
            look_heading: Vector3::unit_y(),
            look_altitude: 0.0,
            health: MAX_HEALTH,
            game_mode: GameMode::Normal,
            movement: Movement::default(),
            fall_velocity: 0.0,
            holding_jump: false,
            in_jump: false,
            render_distance,
            focus: None,
            held_material: DEFAULT_HELD_MATERIAL,
        };
        player.apply_state(state);
        player
    }

    /// Overwrites position, look, health and mode with an authoritative
    /// snapshot. Velocities are kept.
    pub fn apply_state(&mut self, state: &PlayerState) {
        self.position = Vector3::from(state.position);
        self.look_heading = Vector3::from(state.look_heading);
        self.look_altitude = state.look_altitude.clamp(-89.9, 89.9);
        self.health = state.health.min(MAX_HEALTH);
        self.game_mode = state.game_mode;
    }

    pub fn to_state(&self) -> PlayerState {
        PlayerState {
            schema_version: PLAYER_SCHEMA_VERSION,
            name: self.name.clone(),
            position: self.position.into(),
            look_heading: self.look_heading.into(),
            look_altitude: self.look_altitude,
            health: self.health,
            game_mode: self.game_mode,
        }
    }

    /// Turns held input into velocities and applies the edge-triggered
    /// mode toggle and look movement.
    pub fn apply_intent(&mut self, intent: &PlayerIntent) {
        let speed = |held: bool| if held { WALK_VELOCITY } else { 0.0 };
        self.movement = Movement {
            up: speed(intent.move_up),
            down: speed(intent.move_down),
            forward: speed(intent.move_forward),
            back: speed(intent.move_backward),
            right: speed(intent.move_right),
            left: speed(intent.move_left),
        };
        self.holding_jump = intent.jump;
        if intent.toggle_game_mode {
            self.game_mode = self.game_mode.toggled();
            self.fall_velocity = 0.0;
            info!("{} switched to {:?} mode", self.name, self.game_mode);
        }
        if let Some((dx, dy)) = intent.swivel {
            self.swivel(dx, dy);
        }
        match intent.select_material {
            Some(material) if material.is_solid() => self.held_material = material,
            Some(material) => warn!("{} cannot hold {:?}", self.name, material),
            None => {}
        }
    }

    /// Direction away from the planet's center.
    pub fn up(&self) -> Vector3<f64> {
        if self.position.magnitude2() > 0.0 {
            self.position.normalize()
        } else {
            Vector3::unit_x()
        }
    }

    /// The look heading projected into the tangent plane.
    pub fn heading(&self) -> Vector3<f64> {
        let up = self.up();
        let projected = self.look_heading - up * self.look_heading.dot(up);
        if projected.magnitude2() > 1e-12 {
            return projected.normalize();
        }
        // Heading points straight up or down; any tangent will do.
        let fallback = if up.x.abs() < 0.9 { Vector3::unit_x() } else { Vector3::unit_y() };
        (fallback - up * fallback.dot(up)).normalize()
    }

    /// Tangent direction to the player's right.
    pub fn right(&self) -> Vector3<f64> {
        self.heading().cross(self.up())
    }

    /// Unit vector the player is looking along.
    pub fn look_dir(&self) -> Vector3<f64> {
        let angle = Rad((self.look_altitude - 90.0).to_radians());
        Quaternion::from_axis_angle(self.right(), angle).rotate_vector(self.up())
    }

    pub fn look_altitude(&self) -> f64 {
        self.look_altitude
    }

    /// Turns the view by cursor movement: `dx` spins the heading about "up",
    /// `dy` tilts the view, clamped just short of straight up or down.
    pub fn swivel(&mut self, dx: f64, dy: f64) {
        let up = self.up();
        let turn = Rad((-0.1 * dx).to_radians());
        self.look_heading = Quaternion::from_axis_angle(up, turn).rotate_vector(self.heading());
        self.look_altitude = (self.look_altitude - 0.1 * dy).clamp(-89.9, 89.9);
    }

    /// Position of the feet, `PLAYER_HEIGHT` below the eye.
    pub fn feet(&self) -> Vector3<f64> {
        self.position - self.up() * PLAYER_HEIGHT
    }

    /// Requests every chunk within `render_distance` of the feet, over the
    /// full altitude range.
    ///
    /// With `allow_async` the requests only schedule population; without it
    /// they block until every chunk is resident. Failures are logged and the
    /// chunk is skipped.
    pub fn load_nearby_chunks(&self, store: &ChunkStore, allow_async: bool) {
        let planet = store.planet();
        let feet = planet.cartesian_to_cell_coord(self.feet()).floor();
        let center = ChunkIndex::containing(feet);
        let counts = planet.chunk_counts();
        let distance = self.render_distance.max(0);

        let lat_min = (center.lat - distance).max(0);
        let lat_max = (center.lat + distance).min(counts.lat - 1);
        // Never visit a longitude twice on small planets.
        let lon_span = (2 * distance + 1).min(counts.lon);
        for lon in (center.lon - distance)..(center.lon - distance + lon_span) {
            for lat in lat_min..=lat_max {
                for alt in 0..counts.alt {
                    if let Err(err) = store.get_chunk(ChunkIndex::new(lon, lat, alt), allow_async) {
                        warn!("Could not load chunk ({}, {}, {}): {}", lon, lat, alt, err);
                    }
                }
            }
        }
    }

    /// Places the player on the ground below a fixed point above the planet.
    ///
    /// The search starts `SPAWN_CLEARANCE` above the outer radius on the +x
    /// axis, descends one unit at a time until it meets a solid cell (or the
    /// center), then backs off upwards by the same clearance. Chunks along
    /// the way are loaded synchronously. Health and velocities are reset.
    pub fn spawn(&mut self, store: &ChunkStore) {
        let planet = store.planet();
        self.look_heading = Vector3::unit_y();
        self.health = MAX_HEALTH;
        self.movement = Movement::default();
        self.fall_velocity = 0.0;
        self.in_jump = false;
        self.position = Vector3::new(planet.outer_radius() + SPAWN_CLEARANCE, 0.0, 0.0);

        self.load_nearby_chunks(store, false);

        let mut pos = self.position;
        while pos.x > 0.0 && !is_solid(store.material_at(pos, false)) {
            pos.x -= 1.0;
        }
        pos.x += SPAWN_CLEARANCE;
        self.position = pos;
        debug!("{} spawned at {:?}", self.name, self.position);
    }

    /// Adds `amount` (negative for damage) to health.
    ///
    /// Reaching zero or below respawns the player, which restores full
    /// health; the result is then clamped to `MAX_HEALTH`.
    ///
    /// # Returns
    /// Whether the player respawned.
    pub fn update_health(&mut self, amount: i32, store: &ChunkStore) -> bool {
        self.health = self.health.saturating_add(amount);
        let respawned = self.health <= 0;
        if respawned {
            info!("{} died and respawns", self.name);
            self.spawn(store);
        }
        self.health = self.health.min(MAX_HEALTH);
        respawned
    }

    /// Applies a hit of `amount` points. Negative amounts count as zero.
    ///
    /// # Returns
    /// Whether the player respawned.
    pub fn take_damage(&mut self, amount: i32, store: &ChunkStore) -> bool {
        self.update_health(amount.max(0).saturating_neg(), store)
    }
}

fn is_solid(material: crate::error::Result<Option<Material>>) -> bool {
    matches!(material, Ok(Some(material)) if material.is_solid())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Registries;
    use crate::engine_state::voxels::chunk_source::GeneratedSource;
    use crate::engine_state::voxels::planet::test_planet;
    use crate::engine_state::voxels::world::StoreOptions;
    use approx::assert_relative_eq;

    /// Store over a small bumpy planet: radius 16, 32 altitude cells.
    pub(crate) fn test_store() -> ChunkStore {
        let planet = test_planet(16.0, 32);
        let generator = Registries::builtin().generators.bind(&planet).unwrap();
        ChunkStore::new(
            planet,
            Box::new(GeneratedSource::new(generator)),
            StoreOptions {
                max_resident_chunks: 1024,
                worker_threads: 1,
            },
        )
    }

    #[test]
    fn spawn_lands_above_ground() {
        let store = test_store();
        let mut player = Player::new("p", 1);
        player.spawn(&store);

        assert_eq!(player.health, MAX_HEALTH);
        assert_eq!(player.position.y, 0.0);
        assert!(player.position.x > 0.0);
        assert!(player.position.x <= store.planet().outer_radius() + SPAWN_CLEARANCE);
        let below = player.position - Vector3::unit_x() * SPAWN_CLEARANCE;
        assert!(is_solid(store.material_at(below, false)));
    }

    #[test]
    fn health_respawns_once_and_clamps() {
        let store = test_store();
        let mut player = Player::new("p", 1);
        player.spawn(&store);

        assert!(!player.update_health(-3, &store));
        assert_eq!(player.health, MAX_HEALTH - 3);
        assert!(!player.update_health(100, &store));
        assert_eq!(player.health, MAX_HEALTH);

        player.position = Vector3::new(1000.0, 0.0, 0.0);
        assert!(player.update_health(-MAX_HEALTH, &store));
        assert_eq!(player.health, MAX_HEALTH);
        assert!(player.position.x < 1000.0);
        assert!(!player.update_health(-1, &store));
        assert_eq!(player.health, MAX_HEALTH - 1);
    }

    #[test]
    fn damage_ignores_negative_and_extreme_amounts() {
        let store = test_store();
        let mut player = Player::new("p", 1);
        player.spawn(&store);

        assert!(!player.take_damage(-5, &store));
        assert!(!player.take_damage(i32::MIN, &store));
        assert_eq!(player.health, MAX_HEALTH);
        assert!(!player.take_damage(2, &store));
        assert_eq!(player.health, MAX_HEALTH - 2);
        assert!(player.take_damage(i32::MAX, &store));
        assert_eq!(player.health, MAX_HEALTH);
    }

    #[test]
    fn intent_selects_only_solid_materials() {
        let mut player = Player::new("p", 1);
        assert_eq!(player.held_material, DEFAULT_HELD_MATERIAL);

        player.apply_intent(&PlayerIntent {
            select_material: Some(Material::BlueBlock),
            ..PlayerIntent::default()
        });
        assert_eq!(player.held_material, Material::BlueBlock);

        player.apply_intent(&PlayerIntent {
            select_material: Some(Material::Air),
            ..PlayerIntent::default()
        });
        player.apply_intent(&PlayerIntent::default());
        assert_eq!(player.held_material, Material::BlueBlock);
    }

    #[test]
    fn level_look_follows_heading() {
        let mut player = Player::new("p", 1);
        player.position = Vector3::new(0.0, 0.0, 50.0);
        player.look_heading = Vector3::new(0.0, 1.0, 0.3);

        let look = player.look_dir();
        assert_relative_eq!(look.magnitude(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(look.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(player.right().x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn swivel_clamps_altitude() {
        let mut player = Player::new("p", 1);
        player.position = Vector3::new(0.0, 0.0, 50.0);

        player.swivel(0.0, -10_000.0);
        assert_relative_eq!(player.look_altitude(), 89.9);
        assert!(player.look_dir().z > 0.99);

        player.swivel(0.0, 20_000.0);
        assert_relative_eq!(player.look_altitude(), -89.9);

        player.swivel(-900.0, 0.0);
        assert_relative_eq!(player.heading().x, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn state_survives_snapshot() {
        let mut player = Player::new("p", 2);
        player.position = Vector3::new(1.0, 2.0, 3.0);
        player.health = 4;
        player.game_mode = GameMode::Flying;

        let restored = Player::from_state(&player.to_state(), 2);
        assert_eq!(restored.to_state(), player.to_state());
    }

    #[test]
    fn nearby_chunks_cover_every_altitude() {
        let store = test_store();
        let mut player = Player::new("p", 0);
        player.position = Vector3::new(store.planet().radius + 3.0, 0.0, 0.0);

        player.load_nearby_chunks(&store, false);
        assert_eq!(store.resident_count(), store.planet().chunk_counts().alt as usize);
    }
}
