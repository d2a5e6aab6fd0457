//! # World Client
//!
//! The client end of a link to the authority. Outgoing calls go through the
//! retry policy in [`RpcConfig`]; incoming calls from the server (player
//! state queries, corrections, damage) are answered from an inbox the frame
//! loop drains once per frame.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::Engine;
use log::{debug, info};

use super::protocol::{Request, Response};
use super::transport::{Connection, RequestHandler};
use crate::config::RpcConfig;
use crate::engine_state::player::PlayerState;
use crate::engine_state::voxels::{
    block::material::Material,
    chunk::Chunk,
    coords::{CellLoc, ChunkIndex},
    planet::PlanetRecord,
};
use crate::error::{Result, WorldError};
use crate::persistence::ChunkBlob;

/// Damage dealt to the local player by another player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DamageEvent {
    pub from: String,
    pub amount: i32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Calls the server makes, parked for the frame loop.
struct ClientInbox {
    snapshot: Mutex<PlayerState>,
    damage: Mutex<Vec<DamageEvent>>,
    correction: Mutex<Option<PlayerState>>,
}

impl RequestHandler for ClientInbox {
    fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetPlayerState => Response::PlayerState {
                state: lock(&self.snapshot).clone(),
            },
            Request::PushPlayerState { state } => {
                debug!("Server corrected player state of {}", state.name);
                *lock(&self.correction) = Some(state);
                Response::Ack
            }
            Request::ApplyDamage { from, amount } => {
                lock(&self.damage).push(DamageEvent { from, amount });
                Response::Ack
            }
            other => Response::Error {
                message: format!("clients do not serve {}", other.name()),
            },
        }
    }
}

fn unexpected(call: &str, response: Response) -> WorldError {
    WorldError::Transport(format!("unexpected response to {call}: {response:?}"))
}

/// A connection to the authoritative server.
pub struct WorldClient {
    connection: Arc<Connection>,
    inbox: Arc<ClientInbox>,
    rpc: RpcConfig,
}

impl WorldClient {
    /// Connects to the server at `addr`.
    ///
    /// # Arguments
    /// * `addr` - `host:port` of the server
    /// * `state` - The player's current state; the server asks for it during
    ///   the handshake to learn who connected
    /// * `rpc` - Deadline and retry policy for every call
    pub fn connect(addr: &str, state: PlayerState, rpc: RpcConfig) -> Result<Arc<Self>> {
        let inbox = Arc::new(ClientInbox {
            snapshot: Mutex::new(state),
            damage: Mutex::new(Vec::new()),
            correction: Mutex::new(None),
        });
        let connection = Connection::connect(addr, inbox.clone())?;
        info!("Connected to world server at {}", connection.peer_addr());
        Ok(Arc::new(WorldClient {
            connection,
            inbox,
            rpc,
        }))
    }

    fn call(&self, request: Request) -> Result<Response> {
        self.connection.call_with_retry(request, &self.rpc)
    }

    /// Fetches a chunk from the authority. Blocks until it arrives.
    pub fn fetch_chunk(&self, planet_id: u32, index: ChunkIndex) -> Result<Chunk> {
        match self.call(Request::FetchChunk { planet_id, index })? {
            Response::Chunk { blob_base64 } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(blob_base64.as_bytes())
                    .map_err(|err| WorldError::Transport(format!("chunk blob is not base64: {err}")))?;
                Ok(ChunkBlob::from_bytes(bytes)?.to_chunk(index))
            }
            other => Err(unexpected("fetch_chunk", other)),
        }
    }

    /// Submits an edit. Returns once the authority has persisted it.
    pub fn submit_cell_edit(&self, planet_id: u32, loc: CellLoc, material: Material) -> Result<()> {
        match self.call(Request::SubmitCellEdit { planet_id, loc, material })? {
            Response::Ack => Ok(()),
            other => Err(unexpected("submit_cell_edit", other)),
        }
    }

    /// Deals `amount` damage to another player. Never retried.
    pub fn hit_player(&self, target: &str, amount: i32) -> Result<()> {
        let from = lock(&self.inbox.snapshot).name.clone();
        let request = Request::HitPlayer {
            from,
            target: target.to_string(),
            amount,
        };
        match self.call(request)? {
            Response::Ack => Ok(()),
            other => Err(unexpected("hit_player", other)),
        }
    }

    pub fn get_planet(&self, planet_id: u32) -> Result<PlanetRecord> {
        match self.call(Request::GetPlanet { planet_id })? {
            Response::Planet { record } => Ok(record),
            other => Err(unexpected("get_planet", other)),
        }
    }

    /// Stores the player's state in the server's player table.
    pub fn save_player_state(&self, state: &PlayerState) -> Result<()> {
        self.update_snapshot(state.clone());
        match self.call(Request::SavePlayerState { state: state.clone() })? {
            Response::Ack => Ok(()),
            other => Err(unexpected("save_player_state", other)),
        }
    }

    /// Replaces the state reported when the server asks for it.
    pub fn update_snapshot(&self, state: PlayerState) {
        *lock(&self.inbox.snapshot) = state;
    }

    /// Damage received since the last call, oldest first.
    pub fn take_damage_events(&self) -> Vec<DamageEvent> {
        mem::take(&mut *lock(&self.inbox.damage))
    }

    /// The latest authoritative state pushed by the server, if any arrived
    /// since the last call.
    pub fn take_state_correction(&self) -> Option<PlayerState> {
        lock(&self.inbox.correction).take()
    }

    pub fn is_connected(&self) -> bool {
        !self.connection.is_closed()
    }

    pub fn close(&self) {
        self.connection.close();
    }
}

impl Drop for WorldClient {
    fn drop(&mut self) {
        self.connection.close();
    }
}
