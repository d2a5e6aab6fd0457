//! # Persistence Layer
//!
//! Durable storage for the authoritative server, laid out as a directory:
//!
//! ```text
//! <root>/manifest.json                          format tag and version
//! <root>/planets/<id>.json                      PlanetRecord
//! <root>/chunks/<planet>/<lon>_<lat>_<alt>.chunk ChunkBlob
//! <root>/players/<name>.json                    PlayerState
//! ```
//!
//! Every write goes to a temporary file that is synced and then renamed over
//! the final path, so a reader sees either the old value or the new one.
//! Writes to the same key are serialized by a lock chosen by hashing the key
//! into a fixed set of stripes; writes to keys on different stripes proceed
//! in parallel. The lock table does not grow with the number of keys.
//!
//! Failures surface as `WorldError::PersistenceIo`. A missing key is `Ok(None)`,
//! never an error, and a corrupt value is an error, never `None`.

pub mod chunk_blob;

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::engine_state::player::{PlayerState, PLAYER_SCHEMA_VERSION};
use crate::engine_state::voxels::coords::ChunkIndex;
use crate::engine_state::voxels::planet::{PlanetRecord, PLANET_SCHEMA_VERSION};
use crate::error::{Result, WorldError};
pub use chunk_blob::ChunkBlob;

const MANIFEST_FILE: &str = "manifest.json";
const PLANETS_DIR: &str = "planets";
const CHUNKS_DIR: &str = "chunks";
const PLAYERS_DIR: &str = "players";

pub const STORE_FORMAT_TAG: &str = "sphere-world";
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Number of write locks shared by all keys.
const KEY_LOCK_STRIPES: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format: String,
    version: u32,
}

/// Directory-backed world storage. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct WorldStore {
    root: PathBuf,
    key_locks: Vec<Mutex<()>>,
}

impl WorldStore {
    /// Opens a store, creating the layout on first use.
    ///
    /// # Errors
    /// `PersistenceIo` if the directory cannot be created or holds a store of
    /// another format or version.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [PLANETS_DIR, CHUNKS_DIR, PLAYERS_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }

        let store = WorldStore {
            root,
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        };
        let manifest_path = store.root.join(MANIFEST_FILE);
        match read_json::<Manifest>(&manifest_path)? {
            Some(manifest) => {
                if manifest.format != STORE_FORMAT_TAG || manifest.version != STORE_FORMAT_VERSION {
                    return Err(WorldError::corrupt(format!(
                        "unsupported store format {} v{}",
                        manifest.format, manifest.version
                    )));
                }
            }
            None => {
                write_json_atomic(
                    &manifest_path,
                    &Manifest {
                        format: STORE_FORMAT_TAG.to_string(),
                        version: STORE_FORMAT_VERSION,
                    },
                )?;
                info!("Initialized world store at {}", store.root.display());
            }
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stripe_of(&self, path: &Path) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() % self.key_locks.len() as u64) as usize
    }

    /// Holds off every other write to `path` until the guard drops.
    fn lock_for(&self, path: &Path) -> MutexGuard<'_, ()> {
        self.key_locks[self.stripe_of(path)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn planet_path(&self, id: u32) -> PathBuf {
        self.root.join(PLANETS_DIR).join(format!("{id}.json"))
    }

    fn chunk_path(&self, planet_id: u32, index: ChunkIndex) -> PathBuf {
        self.root
            .join(CHUNKS_DIR)
            .join(planet_id.to_string())
            .join(format!("{}_{}_{}.chunk", index.lon, index.lat, index.alt))
    }

    fn player_path(&self, name: &str) -> PathBuf {
        self.root.join(PLAYERS_DIR).join(format!("{}.json", file_key(name)))
    }

    pub fn load_planet(&self, id: u32) -> Result<Option<PlanetRecord>> {
        let record: Option<PlanetRecord> = read_json(&self.planet_path(id))?;
        if let Some(record) = &record {
            check_schema("planet", record.schema_version, PLANET_SCHEMA_VERSION)?;
        }
        Ok(record)
    }

    /// Returns the stored record for `defaults.id`, writing `defaults` first if
    /// there is none. A second call returns the first record unchanged.
    pub fn create_planet_if_absent(&self, defaults: &PlanetRecord) -> Result<PlanetRecord> {
        let path = self.planet_path(defaults.id);
        let _guard = self.lock_for(&path);

        if let Some(existing) = self.load_planet(defaults.id)? {
            return Ok(existing);
        }
        write_json_atomic(&path, defaults)?;
        info!("Created planet {} '{}' ({})", defaults.id, defaults.name, defaults.generator);
        Ok(defaults.clone())
    }

    pub fn load_chunk(&self, planet_id: u32, index: ChunkIndex) -> Result<Option<ChunkBlob>> {
        let path = self.chunk_path(planet_id, index);
        match fs::read(&path) {
            Ok(bytes) => ChunkBlob::from_bytes(bytes).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Upserts a chunk blob. The last write to a key wins.
    pub fn store_chunk(&self, planet_id: u32, index: ChunkIndex, blob: &ChunkBlob) -> Result<()> {
        let path = self.chunk_path(planet_id, index);
        let _guard = self.lock_for(&path);
        write_atomic(&path, blob.as_bytes())?;
        debug!("Stored chunk {:?} of planet {}", index, planet_id);
        Ok(())
    }

    pub fn load_player(&self, name: &str) -> Result<Option<PlayerState>> {
        let state: Option<PlayerState> = read_json(&self.player_path(name))?;
        if let Some(state) = &state {
            check_schema("player", state.schema_version, PLAYER_SCHEMA_VERSION)?;
        }
        Ok(state)
    }

    pub fn store_player(&self, state: &PlayerState) -> Result<()> {
        let path = self.player_path(&state.name);
        let _guard = self.lock_for(&path);
        write_json_atomic(&path, state)
    }
}

fn check_schema(kind: &str, found: u32, supported: u32) -> Result<()> {
    if found > supported {
        return Err(WorldError::corrupt(format!(
            "{kind} record schema v{found} is newer than supported v{supported}"
        )));
    }
    Ok(())
}

/// Maps a player name onto a file name, escaping anything outside
/// `[A-Za-z0-9_-]` so distinct names never share a file.
fn file_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            key.push(byte as char);
        } else {
            key.push_str(&format!("%{byte:02X}"));
        }
    }
    if key.is_empty() {
        key.push('%');
    }
    key
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    let written = write_synced(&tmp_path, bytes).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|error| io::Error::new(io::ErrorKind::Other, error.to_string()))?;
    file.sync_all()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine_state::voxels::block::material::Material;
    use crate::engine_state::voxels::chunk::Chunk;
    use crate::engine_state::voxels::coords::CellLoc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    static TEST_UNIQUIFIER: AtomicU64 = AtomicU64::new(0);

    pub(crate) fn test_root(name: &str) -> PathBuf {
        let serial = TEST_UNIQUIFIER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("sphere-world-{name}-{}-{}", std::process::id(), serial));
        let _ = fs::remove_dir_all(&path);
        path
    }

    fn record(id: u32, name: &str) -> PlanetRecord {
        PlanetRecord {
            schema_version: PLANET_SCHEMA_VERSION,
            id,
            name: name.to_string(),
            generator: "bumpy".to_string(),
            radius: 64.0,
            alt_cells: 64,
            alt_delta: 1.0,
            seed: 99,
            orbit: None,
        }
    }

    #[test]
    fn create_planet_if_absent_keeps_the_first_record() {
        let root = test_root("create-planet");
        let store = WorldStore::open(&root).unwrap();

        assert_eq!(store.load_planet(3).unwrap(), None);
        let first = store.create_planet_if_absent(&record(3, "Spawn")).unwrap();
        let second = store.create_planet_if_absent(&record(3, "Imposter")).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.name, "Spawn");
        assert_eq!(store.load_planet(3).unwrap(), Some(first));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn chunks_upsert_and_survive_reopen() {
        let root = test_root("chunk-upsert");
        let index = ChunkIndex::new(7, 2, 3);
        let loc = index.origin() + CellLoc::new(1, 2, 3);
        let mut chunk = Chunk::empty(index);
        {
            let store = WorldStore::open(&root).unwrap();
            assert_eq!(store.load_chunk(0, index).unwrap(), None);
            store.store_chunk(0, index, &ChunkBlob::from_chunk(&chunk)).unwrap();
            chunk.set_material(loc, Material::Rock);
            store.store_chunk(0, index, &ChunkBlob::from_chunk(&chunk)).unwrap();
        }

        let reopened = WorldStore::open(&root).unwrap();
        let loaded = reopened.load_chunk(0, index).unwrap().unwrap().to_chunk(index);
        assert_eq!(loaded.material(loc), Material::Rock);
        assert_eq!(reopened.load_chunk(1, index).unwrap(), None);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn corrupt_chunk_is_an_error_not_a_miss() {
        let root = test_root("corrupt-chunk");
        let store = WorldStore::open(&root).unwrap();
        let index = ChunkIndex::new(0, 0, 0);
        store
            .store_chunk(0, index, &ChunkBlob::from_chunk(&Chunk::empty(index)))
            .unwrap();
        fs::write(store.chunk_path(0, index), b"garbage").unwrap();

        assert!(matches!(store.load_chunk(0, index), Err(WorldError::PersistenceIo(_))));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn players_round_trip_by_name() {
        let root = test_root("players");
        let store = WorldStore::open(&root).unwrap();
        let mut state = PlayerState::new("ada/../x");
        state.health = 4;
        state.position = [70.0, 1.0, -2.0];

        store.store_player(&state).unwrap();
        assert_eq!(store.load_player("ada/../x").unwrap(), Some(state));
        assert_eq!(store.load_player("ada").unwrap(), None);
        assert!(store.player_path("ada/../x").starts_with(root.join(PLAYERS_DIR)));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn foreign_manifest_is_rejected() {
        let root = test_root("manifest");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(MANIFEST_FILE), r#"{"format":"other","version":1}"#).unwrap();
        assert!(WorldStore::open(&root).is_err());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn failed_writes_leave_no_temporary_file() {
        let root = test_root("failed-write");
        let store = WorldStore::open(&root).unwrap();
        let index = ChunkIndex::new(1, 1, 1);
        let path = store.chunk_path(0, index);
        // A directory in the chunk's place makes the final rename fail.
        fs::create_dir_all(path.join("occupied")).unwrap();

        let blob = ChunkBlob::from_chunk(&Chunk::empty(index));
        assert!(matches!(store.store_chunk(0, index, &blob), Err(WorldError::PersistenceIo(_))));
        let mut tmp_name = path.clone().into_os_string();
        tmp_name.push(".tmp");
        assert!(!PathBuf::from(tmp_name).exists());

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn key_locks_are_a_fixed_set_of_stripes() {
        let root = test_root("key-locks");
        let store = Arc::new(WorldStore::open(&root).unwrap());
        let index = ChunkIndex::new(0, 0, 0);
        let path = store.chunk_path(0, index);
        assert_eq!(store.stripe_of(&path), store.stripe_of(&path));

        std::thread::scope(|scope| {
            for lon in 0..4 {
                let store = store.clone();
                scope.spawn(move || {
                    for alt in 0..50 {
                        let index = ChunkIndex::new(lon, 0, alt);
                        store
                            .store_chunk(0, index, &ChunkBlob::from_chunk(&Chunk::empty(index)))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(store.key_locks.len(), KEY_LOCK_STRIPES);
        assert!(store.load_chunk(0, ChunkIndex::new(3, 0, 49)).unwrap().is_some());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn file_keys_are_distinct_and_flat() {
        assert_eq!(file_key("bob_1"), "bob_1");
        assert_eq!(file_key("a b"), "a%20b");
        assert_ne!(file_key("a/b"), file_key("a_b"));
        assert!(!file_key("../etc").contains('/'));
    }
}
