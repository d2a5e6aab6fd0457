//! # Procedural Generation
//!
//! Named terrain generators and named system presets.
//!
//! A generator assigns a material to a cell from the planet parameters and
//! OpenSimplex noise seeded with the planet's seed. Generators are pure: the
//! same planet and cell always yield the same material, in this process or
//! any other. The authority relies on that to regenerate an unedited chunk
//! identically.
//!
//! ## Built-in generators
//!
//! | key      | terrain                                                    |
//! |----------|------------------------------------------------------------|
//! | `sphere` | Stone below half the altitude band                         |
//! | `moon`   | Moon below half the altitude band                          |
//! | `sun`    | Sun below half the altitude band                           |
//! | `rings`  | Grass core with a noisy equatorial ring high above it      |
//! | `bumpy`  | Rolling grass and dirt hills with blue seas in the hollows |
//! | `caves`  | Stone where 3D noise is positive                           |
//! | `rocks`  | Sparse stone pockets                                       |

use std::collections::HashMap;

use cgmath::InnerSpace;
use log::debug;
use noise::{NoiseFn, OpenSimplex};

use super::block::material::Material;
use super::chunk::Chunk;
use super::coords::{CellLoc, ChunkIndex};
use super::planet::{Orbit, Planet, PlanetRecord, PLANET_SCHEMA_VERSION};
use crate::error::{Result, WorldError};

/// Signature of a terrain generator.
pub type GeneratorFn = fn(&Planet, &OpenSimplex, CellLoc) -> Material;

/// Scale applied to Cartesian positions before sampling 3D noise for `bumpy`.
const BUMPY_NOISE_SCALE: f64 = 0.1;
/// Height of the `bumpy` hills above the mid-band, in cells.
const BUMPY_HILL_HEIGHT: f64 = 8.0;
/// Scale applied to Cartesian positions by `caves` and `rocks`.
const POCKET_NOISE_SCALE: f64 = 0.05;

fn fraction_of_band(planet: &Planet, loc: CellLoc) -> f64 {
    loc.alt as f64 / planet.alt_cells as f64
}

fn sample3(noise: &OpenSimplex, pos: cgmath::Vector3<f64>, scale: f64) -> f64 {
    noise.get([pos.x * scale, pos.y * scale, pos.z * scale])
}

fn sphere(planet: &Planet, _noise: &OpenSimplex, loc: CellLoc) -> Material {
    if fraction_of_band(planet, loc) < 0.5 {
        Material::Stone
    } else {
        Material::Air
    }
}

fn moon(planet: &Planet, _noise: &OpenSimplex, loc: CellLoc) -> Material {
    if fraction_of_band(planet, loc) < 0.5 {
        Material::Moon
    } else {
        Material::Air
    }
}

fn sun(planet: &Planet, _noise: &OpenSimplex, loc: CellLoc) -> Material {
    if fraction_of_band(planet, loc) < 0.5 {
        Material::Sun
    } else {
        Material::Air
    }
}

fn rings(planet: &Planet, noise: &OpenSimplex, loc: CellLoc) -> Material {
    let fraction = fraction_of_band(planet, loc);
    if fraction < 0.5 {
        return Material::Grass;
    }
    if fraction > 0.6 && loc.lat == planet.lat_cells / 2 {
        return if noise.get([loc.alt as f64, 0.0]) > 0.1 {
            Material::YellowBlock
        } else {
            Material::RedBlock
        };
    }
    Material::Air
}

fn bumpy(planet: &Planet, noise: &OpenSimplex, loc: CellLoc) -> Material {
    let mid = (planet.alt_cells / 2) as f64;
    let pos = planet.cell_loc_to_cartesian(loc).normalize() * mid;
    let height = mid + sample3(noise, pos, BUMPY_NOISE_SCALE) * BUMPY_HILL_HEIGHT;
    let alt = loc.alt as f64;
    if alt <= height {
        if alt > mid + 2.0 {
            return Material::Dirt;
        }
        return Material::Grass;
    }
    if alt < mid + 1.0 {
        return Material::BlueBlock;
    }
    Material::Air
}

fn caves(planet: &Planet, noise: &OpenSimplex, loc: CellLoc) -> Material {
    let pos = planet.cell_loc_to_cartesian(loc);
    let half = planet.alt_cells as f64 / 2.0;
    let height = (sample3(noise, pos, POCKET_NOISE_SCALE) + 1.0) * half;
    if height > half {
        Material::Stone
    } else {
        Material::Air
    }
}

fn rocks(planet: &Planet, noise: &OpenSimplex, loc: CellLoc) -> Material {
    let pos = planet.cell_loc_to_cartesian(loc);
    if sample3(noise, pos, POCKET_NOISE_SCALE) > 0.5 {
        Material::Stone
    } else {
        Material::Air
    }
}

/// Mapping from generator key to generator function.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, GeneratorFn>,
}

impl GeneratorRegistry {
    /// A registry holding every built-in generator.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register("sphere", sphere);
        registry.register("moon", moon);
        registry.register("sun", sun);
        registry.register("rings", rings);
        registry.register("bumpy", bumpy);
        registry.register("caves", caves);
        registry.register("rocks", rocks);
        registry
    }

    /// Adds or replaces a generator.
    pub fn register(&mut self, key: &str, generator: GeneratorFn) {
        self.generators.insert(key.to_string(), generator);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.generators.contains_key(key)
    }

    /// Sorted generator keys.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Binds a planet to the generator its key names.
    ///
    /// # Errors
    /// `GeneratorUnknown` if the key is not registered. This is the only place
    /// the lookup happens, so an unknown key surfaces at planet bootstrap.
    pub fn bind(&self, planet: &Planet) -> Result<TerrainGenerator> {
        let generate = self
            .generators
            .get(&planet.generator)
            .copied()
            .ok_or_else(|| WorldError::GeneratorUnknown(planet.generator.clone()))?;
        Ok(TerrainGenerator {
            planet: planet.clone(),
            noise: OpenSimplex::new(planet.seed),
            generate,
        })
    }
}

/// A planet bound to its generator and seeded noise source.
#[derive(Clone)]
pub struct TerrainGenerator {
    planet: Planet,
    noise: OpenSimplex,
    generate: GeneratorFn,
}

impl TerrainGenerator {
    pub fn planet(&self) -> &Planet {
        &self.planet
    }

    /// The material of one cell. Cells outside the altitude band are Air.
    pub fn generate(&self, loc: CellLoc) -> Material {
        if !self.planet.contains_altitude(loc.alt) {
            return Material::Air;
        }
        (self.generate)(&self.planet, &self.noise, loc)
    }

    /// Generates every cell of a chunk.
    pub fn generate_chunk(&self, index: ChunkIndex) -> Chunk {
        debug!("Generating chunk {:?} of planet {}", index, self.planet.id);
        Chunk::from_fn(index, |loc| self.generate(loc))
    }
}

/// One planet of a system preset.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanetDescriptor {
    pub id: u32,
    pub name: String,
    pub generator: String,
    pub radius: f64,
    pub alt_cells: i32,
    pub orbit: Option<Orbit>,
}

impl PlanetDescriptor {
    fn new(id: u32, name: &str, generator: &str, radius: f64, alt_cells: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            generator: generator.to_string(),
            radius,
            alt_cells,
            orbit: None,
        }
    }

    fn orbiting(mut self, parent: u32, distance: f64, period_seconds: f64, rotation_seconds: f64) -> Self {
        self.orbit = Some(Orbit {
            parent,
            distance,
            period_seconds,
            rotation_seconds,
        });
        self
    }

    /// The record a fresh universe persists for this planet.
    pub fn to_record(&self, world_seed: u32) -> PlanetRecord {
        PlanetRecord {
            schema_version: PLANET_SCHEMA_VERSION,
            id: self.id,
            name: self.name.clone(),
            generator: self.generator.clone(),
            radius: self.radius,
            alt_cells: self.alt_cells,
            alt_delta: 1.0,
            seed: world_seed.wrapping_add(self.id),
            orbit: self.orbit.clone(),
        }
    }
}

/// Named lists of planets used to seed a fresh universe.
#[derive(Clone, Default)]
pub struct SystemPresets {
    presets: HashMap<String, Vec<PlanetDescriptor>>,
}

impl SystemPresets {
    pub fn builtin() -> Self {
        let spawn = || PlanetDescriptor::new(0, "Spawn", "bumpy", 64.0, 64);

        let mut presets = Self::default();
        presets.insert("planet", vec![spawn().orbiting(0, 0.0, 0.0, 10.0)]);
        presets.insert(
            "moon",
            vec![
                spawn().orbiting(0, 0.0, 0.0, 10.0),
                PlanetDescriptor::new(1, "Moon", "moon", 32.0, 32).orbiting(0, 100.0, 5.0, 10.0),
            ],
        );
        presets.insert(
            "sun-moon",
            vec![
                spawn().orbiting(2, 300.0, 1095.0, 180.0),
                PlanetDescriptor::new(1, "Moon", "moon", 32.0, 32).orbiting(0, 100.0, 90.0, -90.0),
                PlanetDescriptor::new(2, "Sun", "sun", 64.0, 64).orbiting(2, 0.0, 0.0, 1e10),
            ],
        );

        let mut many = vec![PlanetDescriptor::new(0, "Sun", "sun", 64.0, 64).orbiting(0, 0.0, 0.0, 1e10)];
        for i in 0..100u32 {
            let planet_id = 2 * i + 1;
            many.push(
                PlanetDescriptor::new(planet_id, "Spawn", "sphere", 32.0, 32).orbiting(
                    0,
                    70.0 * (i + 1) as f64,
                    10.0 + i as f64,
                    1e10,
                ),
            );
            many.push(
                PlanetDescriptor::new(planet_id + 1, "Spawn", "sphere", 16.0, 16)
                    .orbiting(planet_id, 30.0, 5.0, 1e10),
            );
        }
        presets.insert("many", many);
        presets
    }

    pub fn insert(&mut self, name: &str, planets: Vec<PlanetDescriptor>) {
        self.presets.insert(name.to_string(), planets);
    }

    pub fn get(&self, name: &str) -> Option<&[PlanetDescriptor]> {
        self.presets.get(name).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::chunk::{CHUNK_DIMENSION, CHUNK_SIZE};
    use crate::engine_state::voxels::planet::test_planet;
    use test_case::test_case;

    #[test_case("sphere")]
    #[test_case("moon")]
    #[test_case("sun")]
    #[test_case("rings")]
    #[test_case("bumpy")]
    #[test_case("caves")]
    #[test_case("rocks")]
    fn generators_are_deterministic(key: &str) {
        let mut planet = test_planet(64.0, 64);
        planet.generator = key.to_string();
        let registry = GeneratorRegistry::builtin();
        let first = registry.bind(&planet).unwrap();
        let second = registry.bind(&planet).unwrap();

        for index in [ChunkIndex::new(0, 0, 0), ChunkIndex::new(5, 6, 2), ChunkIndex::new(25, 12, 3)] {
            let chunk = first.generate_chunk(index);
            assert_eq!(chunk.materials().len(), CHUNK_SIZE);
            assert_eq!(chunk, second.generate_chunk(index));
        }
    }

    #[test]
    fn unknown_key_fails_at_bind() {
        let mut planet = test_planet(64.0, 64);
        planet.generator = "lava".to_string();
        match GeneratorRegistry::builtin().bind(&planet) {
            Err(WorldError::GeneratorUnknown(key)) => assert_eq!(key, "lava"),
            _ => panic!("expected GeneratorUnknown"),
        }
    }

    #[test]
    fn bumpy_has_ground_below_and_sky_above() {
        let planet = test_planet(64.0, 64);
        let generator = GeneratorRegistry::builtin().bind(&planet).unwrap();
        for lon in (0..planet.lon_cells).step_by(37) {
            for lat in (0..planet.lat_cells).step_by(23) {
                assert!(generator.generate(CellLoc::new(lon, lat, 10)).is_solid());
                assert_eq!(generator.generate(CellLoc::new(lon, lat, 60)), Material::Air);
            }
        }
    }

    #[test]
    fn cells_above_the_band_are_air() {
        let mut planet = test_planet(2.0, 5);
        planet.generator = "sphere".to_string();
        let generator = GeneratorRegistry::builtin().bind(&planet).unwrap();
        let chunk = generator.generate_chunk(ChunkIndex::new(0, 0, 0));
        let column = |alt| chunk.material(CellLoc::new(3, 3, alt));
        assert_eq!(column(0), Material::Stone);
        assert_eq!(column(2), Material::Stone);
        assert_eq!(column(3), Material::Air);
        assert_eq!(column(CHUNK_DIMENSION - 1), Material::Air);
    }

    #[test]
    fn seeds_change_noisy_terrain() {
        let planet = test_planet(64.0, 64);
        let mut reseeded = planet.clone();
        reseeded.seed += 1;
        let registry = GeneratorRegistry::builtin();
        let index = ChunkIndex::new(3, 4, 2);
        assert_ne!(
            registry.bind(&planet).unwrap().generate_chunk(index),
            registry.bind(&reseeded).unwrap().generate_chunk(index)
        );
    }

    #[test]
    fn presets_reference_known_generators() {
        let registries = crate::config::Registries::builtin();
        for name in ["planet", "moon", "sun-moon", "many"] {
            let planets = registries.presets.get(name).unwrap();
            assert!(!planets.is_empty());
            for descriptor in planets {
                assert!(registries.generators.contains(&descriptor.generator));
            }
        }
        assert_eq!(registries.presets.get("many").unwrap().len(), 201);
        assert!(registries.presets.get("galaxy").is_none());
    }
}
