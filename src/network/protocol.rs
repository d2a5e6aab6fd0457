//! # Wire Protocol
//!
//! Message types exchanged between a client and the authority. A connection
//! carries two independent request/response streams, told apart by
//! [`Channel`]: calls the client makes and the server answers, and calls the
//! server makes and the client answers. Each frame is one line of JSON.

use serde::{Deserialize, Serialize};

use crate::engine_state::player::PlayerState;
use crate::engine_state::voxels::{
    block::material::Material,
    coords::{CellLoc, ChunkIndex},
    planet::PlanetRecord,
};
use crate::error::{Result, WorldError};

/// Logical stream a frame belongs to. Request ids are only unique per stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// The client calls, the server responds.
    ClientCalls,
    /// The server calls, the client responds.
    ServerCalls,
}

impl Channel {
    /// The channel the other end issues calls on.
    pub fn peer(self) -> Channel {
        match self {
            Channel::ClientCalls => Channel::ServerCalls,
            Channel::ServerCalls => Channel::ClientCalls,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // Client to server.
    FetchChunk {
        planet_id: u32,
        index: ChunkIndex,
    },
    SubmitCellEdit {
        planet_id: u32,
        loc: CellLoc,
        material: Material,
    },
    HitPlayer {
        from: String,
        target: String,
        amount: i32,
    },
    GetPlanet {
        planet_id: u32,
    },
    SavePlayerState {
        state: PlayerState,
    },
    // Server to client.
    GetPlayerState,
    PushPlayerState {
        state: PlayerState,
    },
    ApplyDamage {
        from: String,
        amount: i32,
    },
}

impl Request {
    /// Whether repeating the call has the same effect as making it once.
    /// Only idempotent calls are retried.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, Request::HitPlayer { .. } | Request::ApplyDamage { .. })
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Request::FetchChunk { .. } => "fetch_chunk",
            Request::SubmitCellEdit { .. } => "submit_cell_edit",
            Request::HitPlayer { .. } => "hit_player",
            Request::GetPlanet { .. } => "get_planet",
            Request::SavePlayerState { .. } => "save_player_state",
            Request::GetPlayerState => "get_player_state",
            Request::PushPlayerState { .. } => "push_player_state",
            Request::ApplyDamage { .. } => "apply_damage",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// A serialized chunk blob, base64 encoded.
    Chunk { blob_base64: String },
    Ack,
    Planet { record: PlanetRecord },
    PlayerState { state: PlayerState },
    Error { message: String },
}

impl Response {
    pub fn error(err: &WorldError) -> Self {
        Response::Error {
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum FrameBody {
    Request(Request),
    Response(Response),
}

/// One line on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub channel: Channel,
    pub id: u64,
    pub body: FrameBody,
}

impl Frame {
    /// Serializes the frame as a single JSON line without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| frame_error("unencodable", err))
    }

    pub fn decode(line: &str) -> Result<Frame> {
        serde_json::from_str(line.trim()).map_err(|err| frame_error("malformed", err))
    }
}

fn frame_error(what: &str, err: serde_json::Error) -> WorldError {
    WorldError::Transport(format!("{what} frame: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_single_tagged_json_lines() {
        let frame = Frame {
            channel: Channel::ClientCalls,
            id: 7,
            body: FrameBody::Request(Request::SubmitCellEdit {
                planet_id: 0,
                loc: CellLoc::new(5, 5, 60),
                material: Material::Stone,
            }),
        };

        let line = frame.encode().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""channel":"client_calls""#));
        assert!(line.contains(r#""type":"submit_cell_edit""#));
        assert!(line.contains(r#""material":"stone""#));
        assert_eq!(Frame::decode(&format!("{line}\n")).unwrap(), frame);
    }

    #[test]
    fn unit_requests_and_responses_decode() {
        let line = r#"{"channel":"server_calls","id":1,"body":{"kind":"request","payload":{"type":"get_player_state"}}}"#;
        let frame = Frame::decode(line).unwrap();
        assert_eq!(frame.channel, Channel::ServerCalls);
        assert_eq!(frame.body, FrameBody::Request(Request::GetPlayerState));

        let line = r#"{"channel":"client_calls","id":2,"body":{"kind":"response","payload":{"type":"ack"}}}"#;
        assert_eq!(Frame::decode(line).unwrap().body, FrameBody::Response(Response::Ack));
    }

    #[test]
    fn malformed_frames_are_transport_errors() {
        assert!(matches!(Frame::decode("{not json"), Err(WorldError::Transport(_))));
    }

    #[test]
    fn damage_is_never_idempotent() {
        let hit = Request::HitPlayer {
            from: "a".into(),
            target: "b".into(),
            amount: 1,
        };
        assert!(!hit.is_idempotent());
        assert!(!Request::ApplyDamage { from: "a".into(), amount: 1 }.is_idempotent());
        assert!(Request::FetchChunk {
            planet_id: 0,
            index: ChunkIndex::new(0, 0, 0)
        }
        .is_idempotent());
        assert!(Request::GetPlayerState.is_idempotent());
    }

    #[test]
    fn frame_codec_errors_are_transport_failures() {
        let err = serde_json::from_str::<Frame>("{").unwrap_err();
        match frame_error("unencodable", err) {
            WorldError::Transport(message) => assert!(message.starts_with("unencodable frame")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(Frame::decode("not json"), Err(WorldError::Transport(_))));
    }
}
