//! # World Server
//!
//! The authority. It owns one [`ChunkStore`] per planet, each backed by a
//! [`PersistentSource`], and the player table in the [`WorldStore`].
//!
//! ## Connection lifecycle
//!
//! 1. Accept, then open a [`Connection`] that serves the client's calls
//! 2. Ask the client for its player state to learn its name
//! 3. Push the stored state for that name, if there is one
//! 4. Register the player so others can reach it with `HitPlayer`
//! 5. When the connection closes, unregister it
//!
//! Each edit is applied to the planet's chunk store and written to storage
//! before it is acknowledged, so an acknowledged edit survives a restart.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use base64::Engine;
use log::{debug, error, info, warn};

use super::protocol::{Channel, Request, Response};
use super::transport::{Connection, RequestHandler};
use crate::config::{Registries, RpcConfig, ServerConfig};
use crate::engine_state::player::PlayerState;
use crate::engine_state::voxels::{
    block::material::Material,
    chunk_source::PersistentSource,
    coords::{CellLoc, ChunkIndex},
    planet::{Planet, PlanetRecord},
    world::{ChunkStore, StoreOptions},
};
use crate::error::{Result, WorldError};
use crate::persistence::{ChunkBlob, WorldStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Authoritative state shared by every connection.
pub struct WorldServer {
    store: Arc<WorldStore>,
    planets: HashMap<u32, Arc<ChunkStore>>,
    /// Connected players by name.
    players: Mutex<HashMap<String, Arc<Connection>>>,
    /// Every open connection, including those still in the handshake.
    connections: Mutex<HashMap<SocketAddr, Arc<Connection>>>,
    rpc: RpcConfig,
}

impl WorldServer {
    /// Opens the world in `config.data_dir`.
    ///
    /// Planets of the configured system preset that have no stored record
    /// yet are created from the preset; stored records always win, so a
    /// world keeps its parameters when the preset changes.
    ///
    /// # Errors
    /// - `GeneratorUnknown` if a planet names a generator the registry lacks
    /// - `PersistenceIo` if the store cannot be opened or a record is corrupt
    /// - `OutOfRange` if the preset does not exist
    pub fn open(config: &ServerConfig, registries: &Registries) -> Result<Arc<Self>> {
        let store = Arc::new(WorldStore::open(&config.data_dir)?);
        let descriptors = registries
            .presets
            .get(&config.system)
            .ok_or_else(|| WorldError::OutOfRange(format!("unknown system preset '{}'", config.system)))?;

        let options = StoreOptions {
            max_resident_chunks: config.max_resident_chunks,
            worker_threads: config.worker_threads,
        };
        let mut planets = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let record = store.create_planet_if_absent(&descriptor.to_record(config.world_seed))?;
            let planet = Planet::from_record(&record);
            let generator = registries.generators.bind(&planet)?;
            debug!(
                "Planet {} '{}': {}x{}x{} cells",
                planet.id, planet.name, planet.lon_cells, planet.lat_cells, planet.alt_cells
            );
            let source = PersistentSource::new(store.clone(), generator);
            planets.insert(planet.id, Arc::new(ChunkStore::new(planet, Box::new(source), options)));
        }
        info!(
            "Opened world '{}' with {} planets at {}",
            config.system,
            planets.len(),
            config.data_dir.display()
        );

        Ok(Arc::new(WorldServer {
            store,
            planets,
            players: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            rpc: config.rpc.clone(),
        }))
    }

    /// The chunk store of a planet.
    pub fn chunk_store(&self, planet_id: u32) -> Result<&Arc<ChunkStore>> {
        self.planets
            .get(&planet_id)
            .ok_or_else(|| WorldError::OutOfRange(format!("no planet with id {planet_id}")))
    }

    pub fn planet_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.planets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn planet_record(&self, planet_id: u32) -> Result<PlanetRecord> {
        Ok(self.chunk_store(planet_id)?.planet().to_record())
    }

    /// The current contents of a chunk, populating it if needed.
    pub fn fetch_chunk(&self, planet_id: u32, index: ChunkIndex) -> Result<ChunkBlob> {
        let chunk = self
            .chunk_store(planet_id)?
            .get_chunk(index, false)?
            .ok_or_else(|| WorldError::Transport(format!("chunk {index:?} did not populate")))?;
        let blob = ChunkBlob::from_chunk(&chunk.get());
        Ok(blob)
    }

    /// Applies and persists one edit. Repeating an edit changes nothing.
    pub fn submit_cell_edit(&self, planet_id: u32, loc: CellLoc, material: Material) -> Result<()> {
        let store = self.chunk_store(planet_id)?;
        let loc = store.planet().normalize_cell_loc(loc)?;
        let index = store.planet().chunk_index_of(loc);
        loop {
            store.get_chunk(index, false)?;
            // The chunk can be evicted between the two calls; load it again.
            if store.set_cell_material(loc, material)? {
                debug!("Planet {} cell {:?} set to {:?}", planet_id, loc, material);
                return Ok(());
            }
        }
    }

    /// Forwards damage to the target player's client.
    ///
    /// # Errors
    /// `OutOfRange` for a negative `amount` or a target that is not connected.
    pub fn hit_player(&self, from: &str, target: &str, amount: i32) -> Result<()> {
        if amount < 0 {
            return Err(WorldError::OutOfRange(format!("hit of {amount} on '{target}' is negative")));
        }
        let connection = lock(&self.players)
            .get(target)
            .cloned()
            .ok_or_else(|| WorldError::OutOfRange(format!("player '{target}' is not connected")))?;
        let request = Request::ApplyDamage {
            from: from.to_string(),
            amount,
        };
        match connection.call_with_retry(request, &self.rpc)? {
            Response::Ack => Ok(()),
            other => Err(WorldError::Transport(format!("unexpected response to apply_damage: {other:?}"))),
        }
    }

    pub fn save_player_state(&self, state: &PlayerState) -> Result<()> {
        self.store.store_player(state)
    }

    /// Names of the players currently connected.
    pub fn player_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.players).keys().cloned().collect();
        names.sort();
        names
    }

    /// Accepts connections on `listener` until the returned handle is shut
    /// down.
    pub fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<ServerHandle> {
        let local_addr = listener
            .local_addr()
            .map_err(|err| WorldError::Transport(err.to_string()))?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let server = self.clone();
        let stop = shutdown.clone();
        let accept_thread = thread::Builder::new()
            .name("world-accept".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    match stream {
                        Ok(stream) => server.attach(stream),
                        Err(err) => warn!("Accept failed: {}", err),
                    }
                }
                debug!("Accept loop on {} exiting", local_addr);
            })
            .map_err(|err| WorldError::Transport(err.to_string()))?;
        info!("World server listening on {}", local_addr);

        Ok(ServerHandle {
            server: self.clone(),
            local_addr,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    /// Runs the session for one accepted stream on its own thread.
    pub fn attach(self: &Arc<Self>, stream: TcpStream) {
        let server = self.clone();
        let spawned = thread::Builder::new()
            .name("world-session".to_string())
            .spawn(move || server.run_session(stream));
        if let Err(err) = spawned {
            error!("Could not start session thread: {}", err);
        }
    }

    fn run_session(self: Arc<Self>, stream: TcpStream) {
        let handler = Arc::new(ServerSession { server: self.clone() });
        let connection = match Connection::open(stream, Channel::ServerCalls, handler) {
            Ok(connection) => connection,
            Err(err) => {
                warn!("Could not open connection: {}", err);
                return;
            }
        };
        let peer = connection.peer_addr();
        lock(&self.connections).insert(peer, connection.clone());

        match self.handshake(&connection) {
            Ok(name) => {
                if let Some(previous) = lock(&self.players).insert(name.clone(), connection.clone()) {
                    info!("Player {} reconnected; closing the old connection", name);
                    previous.close();
                }
                info!("Player {} joined from {}", name, peer);
                connection.wait_closed();

                let mut players = lock(&self.players);
                if players.get(&name).is_some_and(|current| Arc::ptr_eq(current, &connection)) {
                    players.remove(&name);
                }
                drop(players);
                info!("Player {} left", name);
            }
            Err(err) => {
                warn!("Handshake with {} failed: {}", peer, err);
                connection.close();
            }
        }
        lock(&self.connections).remove(&peer);
    }

    /// Learns who connected and restores their stored state.
    fn handshake(&self, connection: &Connection) -> Result<String> {
        let state = match connection.call_with_retry(Request::GetPlayerState, &self.rpc)? {
            Response::PlayerState { state } => state,
            other => {
                return Err(WorldError::Transport(format!(
                    "unexpected response to get_player_state: {other:?}"
                )))
            }
        };
        if let Some(saved) = self.store.load_player(&state.name)? {
            debug!("Restoring stored state of {}", saved.name);
            connection.call_with_retry(Request::PushPlayerState { state: saved }, &self.rpc)?;
        }
        Ok(state.name)
    }

    /// Closes every connection.
    pub fn disconnect_all(&self) {
        let connections: Vec<Arc<Connection>> = lock(&self.connections).values().cloned().collect();
        for connection in connections {
            connection.close();
        }
    }
}

/// Serves one client's calls.
struct ServerSession {
    server: Arc<WorldServer>,
}

impl ServerSession {
    fn dispatch(&self, request: Request) -> Result<Response> {
        let server = &self.server;
        match request {
            Request::FetchChunk { planet_id, index } => {
                let blob = server.fetch_chunk(planet_id, index)?;
                Ok(Response::Chunk {
                    blob_base64: base64::engine::general_purpose::STANDARD.encode(blob.as_bytes()),
                })
            }
            Request::SubmitCellEdit {
                planet_id,
                loc,
                material,
            } => {
                server.submit_cell_edit(planet_id, loc, material)?;
                Ok(Response::Ack)
            }
            Request::HitPlayer { from, target, amount } => {
                server.hit_player(&from, &target, amount)?;
                Ok(Response::Ack)
            }
            Request::GetPlanet { planet_id } => Ok(Response::Planet {
                record: server.planet_record(planet_id)?,
            }),
            Request::SavePlayerState { state } => {
                server.save_player_state(&state)?;
                Ok(Response::Ack)
            }
            other => Err(WorldError::Remote(format!("the server does not serve {}", other.name()))),
        }
    }
}

impl RequestHandler for ServerSession {
    fn handle(&self, request: Request) -> Response {
        let name = request.name();
        self.dispatch(request).unwrap_or_else(|err| {
            debug!("{} failed: {}", name, err);
            Response::error(&err)
        })
    }
}

/// A running accept loop.
pub struct ServerHandle {
    server: Arc<WorldServer>,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server(&self) -> &Arc<WorldServer> {
        &self.server
    }

    /// Blocks until the accept loop ends.
    pub fn join(mut self) {
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
    }

    /// Stops accepting, closes every connection and waits for the accept
    /// loop to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.accept_thread.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        // Wake the blocking accept with a throwaway connection.
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        let _ = TcpStream::connect(wake);
        let _ = thread.join();
        self.server.disconnect_all();
        info!("World server on {} stopped", self.local_addr);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
