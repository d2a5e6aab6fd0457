//! # Player Physics
//!
//! Movement integration and collision against the cell grid, plus the ray
//! march that finds the cell under the crosshair.
//!
//! Every read here goes through the chunk store with `allow_async` set, so a
//! frame never waits on a chunk. Cells whose chunk is still loading are
//! treated as empty: the player may fall briefly into terrain that has not
//! arrived yet, and is pushed back out once it has.

use cgmath::{InnerSpace, Vector3};
use log::trace;

use super::{GameMode, Player, PLAYER_HEIGHT, PLAYER_RADIUS};
use crate::engine_state::voxels::{
    block::cell_side::CellSide, coords::CellLoc, world::ChunkStore,
};

/// Longest step a single update integrates, in seconds.
pub const MAX_TIME_STEP: f64 = 0.05;
/// Downward acceleration in world units per second squared.
pub const GRAVITY: f64 = 20.0;
/// Radial velocity at the start of a jump.
pub const JUMP_VELOCITY: f64 = 7.0;

/// Length of one focus ray march step.
const FOCUS_STEP: f64 = 0.05;
/// Steps in a focus ray march.
const FOCUS_STEPS: usize = 100;

/// Result of the focus ray march.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FocusTarget {
    /// First solid cell along the look ray.
    pub cell: CellLoc,
    /// The empty cell the ray passed through just before, if any; where a
    /// placed cell goes.
    pub before: Option<CellLoc>,
}

fn solid_at(store: &ChunkStore, loc: CellLoc) -> bool {
    matches!(store.cell_material(loc, true), Ok(Some(material)) if material.is_solid())
}

impl Player {
    /// Advances the player by `dt` seconds, clamped to `MAX_TIME_STEP`.
    ///
    /// In `Normal` mode the cell under the feet decides between falling and
    /// standing; a held jump starts one jump per landing. The position is
    /// then integrated and pushed out of any solid neighbour. `Flying` mode
    /// moves freely along the look direction with no gravity or collision.
    pub fn update_position(&mut self, store: &ChunkStore, dt: f64) {
        self.load_nearby_chunks(store, true);
        let dt = dt.clamp(0.0, MAX_TIME_STEP);

        let up = self.up();
        let right = self.right();
        let movement = self.movement;
        match self.game_mode {
            GameMode::Normal => {
                let standing = matches!(
                    store.material_at(self.feet(), true),
                    Ok(Some(material)) if material.is_solid()
                );
                if !standing {
                    self.fall_velocity -= GRAVITY * dt;
                } else if self.holding_jump && !self.in_jump {
                    self.fall_velocity = JUMP_VELOCITY;
                    self.in_jump = true;
                } else {
                    self.fall_velocity = 0.0;
                    self.in_jump = false;
                }

                let velocity = up * self.fall_velocity
                    + self.heading() * (movement.forward - movement.back)
                    + right * (movement.right - movement.left);
                self.position += velocity * dt;
                self.resolve_collisions(store);
            }
            GameMode::Flying => {
                let look = self.look_dir();
                self.position += up * ((movement.up - movement.down) * dt);
                self.position += look * ((movement.forward - movement.back) * dt);
                self.position += right * ((movement.right - movement.left) * dt);
            }
        }

        self.focus = self.focus_target(store).map(|target| target.cell);
    }

    /// Pushes the body out of solid cells, one altitude-step slice at a time
    /// from half a step above the feet up to the eye.
    fn resolve_collisions(&mut self, store: &ChunkStore) {
        let step = store.planet().alt_delta;
        let mut slice = step / 2.0;
        while slice < PLAYER_HEIGHT {
            for side in CellSide::all() {
                self.collide(store, slice, side);
            }
            slice += step;
        }
    }

    /// Resolves one body slice against one neighbour cell.
    ///
    /// The boundary between the slice's cell and the neighbour is the plane
    /// through the point halfway between their centers. Below: the slice may
    /// not sink under that plane. Lateral: the slice keeps `PLAYER_RADIUS`
    /// from it, measured along the tangential face normal.
    fn collide(&mut self, store: &ChunkStore, slice: f64, side: CellSide) {
        let planet = store.planet();
        let up = self.up();
        let pos = self.position - up * (PLAYER_HEIGHT - slice);

        let center = planet.cartesian_to_cell_coord(pos).floor().center();
        let offset = side.offset();
        let (d_lon, d_lat, d_alt) = (offset.lon as f64, offset.lat as f64, offset.alt as f64);
        let neighbour = center.offset(d_lon, d_lat, d_alt);
        let Some(neighbour_loc) = planet.cell_coord_to_cell_loc(neighbour) else {
            return;
        };
        if !solid_at(store, neighbour_loc) {
            return;
        }

        let boundary = planet.cell_coord_to_cartesian(center.offset(d_lon / 2.0, d_lat / 2.0, d_alt / 2.0));
        if side.is_vertical() {
            let depth = up.dot(pos - boundary);
            if depth < 0.0 {
                self.position += up * -depth;
                trace!("Pushed {} up by {:.3}", self.name, -depth);
            }
        } else {
            let across = boundary - planet.cell_coord_to_cartesian(neighbour);
            let tangential = across - up * across.dot(up);
            if tangential.magnitude2() <= f64::EPSILON {
                return;
            }
            let normal: Vector3<f64> = tangential.normalize();
            let distance = normal.dot(pos - boundary);
            if distance < PLAYER_RADIUS {
                self.position += normal * (PLAYER_RADIUS - distance);
            }
        }
    }

    /// Marches `FOCUS_STEPS` steps of `FOCUS_STEP` along the look direction
    /// and reports the first solid cell hit.
    pub fn focus_target(&self, store: &ChunkStore) -> Option<FocusTarget> {
        let planet = store.planet();
        let step = self.look_dir() * FOCUS_STEP;
        let mut pos = self.position;
        let mut current: Option<CellLoc> = None;
        let mut before = None;
        for _ in 0..FOCUS_STEPS {
            pos += step;
            let loc = planet.cartesian_to_cell_loc(pos);
            if loc != current {
                before = current;
                current = loc;
            }
            if let Some(cell) = loc {
                if solid_at(store, cell) {
                    return Some(FocusTarget { cell, before });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::{tests::test_store, PlayerIntent, WALK_VELOCITY};
    use super::*;
    use crate::config::Registries;
    use crate::engine_state::voxels::block::material::Material;
    use crate::engine_state::voxels::chunk_source::GeneratedSource;
    use crate::engine_state::voxels::coords::CellCoord;
    use crate::engine_state::voxels::planet::test_planet;
    use crate::engine_state::voxels::world::StoreOptions;
    use approx::assert_relative_eq;

    /// Flat ground: stone below altitude 16 of 32, radius 16.
    fn flat_store() -> ChunkStore {
        let mut planet = test_planet(16.0, 32);
        planet.generator = "sphere".to_string();
        let generator = Registries::builtin().generators.bind(&planet).unwrap();
        ChunkStore::new(planet, Box::new(GeneratedSource::new(generator)), StoreOptions::default())
    }

    /// A player dropped from altitude 20 onto the middle of cell column
    /// (10, 24), left to settle.
    fn landed(store: &ChunkStore) -> Player {
        let mut player = Player::new("p", 1);
        player.position = store.planet().cell_coord_to_cartesian(CellCoord::new(10.5, 24.5, 20.0));
        player.load_nearby_chunks(store, false);
        for _ in 0..100 {
            player.update_position(store, MAX_TIME_STEP);
        }
        player
    }

    #[test]
    fn dt_is_clamped() {
        let store = test_store();
        let mut player = Player::new("p", 1);
        player.position = Vector3::new(store.planet().outer_radius() + 50.0, 0.0, 0.0);

        player.update_position(&store, 10.0);
        assert_relative_eq!(player.fall_velocity, -GRAVITY * MAX_TIME_STEP);
    }

    #[test]
    fn falling_player_lands_and_stays() {
        let store = flat_store();
        let mut player = landed(&store);

        assert_eq!(player.fall_velocity, 0.0);
        let feet = store.planet().cartesian_to_cell_coord(player.feet());
        assert!((15.0..16.0).contains(&feet.alt), "feet at altitude {}", feet.alt);

        let rest = player.position;
        for _ in 0..50 {
            player.update_position(&store, MAX_TIME_STEP);
        }
        assert_eq!(player.position, rest);
    }

    #[test]
    fn held_jump_launches_from_ground() {
        let store = flat_store();
        let mut player = landed(&store);
        let ground = player.position.magnitude();
        player.apply_intent(&PlayerIntent {
            jump: true,
            ..PlayerIntent::default()
        });

        player.update_position(&store, MAX_TIME_STEP);
        assert_relative_eq!(player.fall_velocity, JUMP_VELOCITY);
        assert!(player.in_jump);
        assert!(player.position.magnitude() > ground);

        player.apply_intent(&PlayerIntent::default());
        for _ in 0..100 {
            player.update_position(&store, MAX_TIME_STEP);
        }
        assert_eq!(player.fall_velocity, 0.0);
        assert!(!player.in_jump);
    }

    #[test]
    fn walls_stop_lateral_movement() {
        let store = flat_store();
        let mut player = landed(&store);
        let planet = store.planet().clone();
        for alt in 16..=18 {
            assert!(store.set_cell_material(CellLoc::new(11, 24, alt), Material::Stone).unwrap());
        }

        let up = player.up();
        let longitude = up.y.atan2(up.x);
        player.look_heading = Vector3::new(-longitude.sin(), longitude.cos(), 0.0);
        player.movement.forward = WALK_VELOCITY;
        for _ in 0..100 {
            player.update_position(&store, MAX_TIME_STEP);
            let coord = planet.cartesian_to_cell_coord(player.position);
            assert!(coord.lon < 11.0, "walked into the wall at lon {}", coord.lon);
        }
        assert!(planet.cartesian_to_cell_coord(player.position).lon > 10.5);
    }

    #[test]
    fn flying_ignores_gravity() {
        let store = test_store();
        let mut player = Player::new("p", 0);
        player.position = Vector3::new(store.planet().outer_radius() + 10.0, 0.0, 0.0);
        player.game_mode = GameMode::Flying;
        let start = player.position;

        player.update_position(&store, MAX_TIME_STEP);
        assert_eq!(player.position, start);

        player.movement.up = 4.0;
        player.update_position(&store, MAX_TIME_STEP);
        assert_relative_eq!(player.position.x, start.x + 0.2, epsilon = 1e-9);
    }

    #[test]
    fn focus_finds_the_ground_below() {
        let store = flat_store();
        let mut player = landed(&store);
        player.swivel(0.0, 10_000.0);

        let target = player.focus_target(&store).unwrap();
        assert_eq!(target.cell.alt, 15);
        assert_eq!(target.before.map(|loc| loc.alt), Some(16));
        assert_eq!(player.focus, None);

        player.update_position(&store, MAX_TIME_STEP);
        assert_eq!(player.focus, Some(target.cell));
    }
}
