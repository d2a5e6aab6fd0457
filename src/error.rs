//! # World Errors
//!
//! Every fallible operation in the engine returns [`WorldError`]. The variants
//! follow the failure domains of the engine: addressing, settings and
//! generator bootstrap, durable storage and the network link to the authority.
//!
//! `serde_json` errors convert to `PersistenceIo`, since stored records are
//! the common case. Settings files and wire frames map theirs explicitly.

use std::fmt;
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorldError>;

/// Errors produced by the spherical voxel world.
#[derive(Debug)]
pub enum WorldError {
    /// A cell or chunk index lies outside the planet. Callers treat this as
    /// "no such cell".
    OutOfRange(String),
    /// A settings file could not be read or parsed.
    Config(String),
    /// A planet names a generator key the registry does not know. Raised when
    /// a planet is bound to its generator, never afterwards.
    GeneratorUnknown(String),
    /// A storage read or write failed, or a stored record is corrupt.
    PersistenceIo(io::Error),
    /// The connection to the peer dropped or could not be established.
    Transport(String),
    /// A remote call did not complete before its deadline.
    Timeout(String),
    /// The peer answered a call with an error.
    Remote(String),
}

impl WorldError {
    /// Builds a `PersistenceIo` error for data that failed validation.
    pub fn corrupt(message: impl Into<String>) -> Self {
        WorldError::PersistenceIo(io::Error::new(io::ErrorKind::InvalidData, message.into()))
    }

    /// Whether a retry of the same idempotent call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorldError::Timeout(_))
    }
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::OutOfRange(what) => write!(f, "out of range: {what}"),
            WorldError::Config(message) => write!(f, "invalid config: {message}"),
            WorldError::GeneratorUnknown(key) => write!(f, "unknown generator '{key}'"),
            WorldError::PersistenceIo(err) => write!(f, "persistence failure: {err}"),
            WorldError::Transport(message) => write!(f, "transport failure: {message}"),
            WorldError::Timeout(call) => write!(f, "call timed out: {call}"),
            WorldError::Remote(message) => write!(f, "remote error: {message}"),
        }
    }
}

impl std::error::Error for WorldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorldError::PersistenceIo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for WorldError {
    fn from(err: io::Error) -> Self {
        WorldError::PersistenceIo(err)
    }
}

impl From<serde_json::Error> for WorldError {
    fn from(err: serde_json::Error) -> Self {
        WorldError::PersistenceIo(io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(WorldError::Timeout("fetch_chunk".into()).is_retryable());
        assert!(!WorldError::Transport("reset".into()).is_retryable());
        assert!(!WorldError::corrupt("bad magic").is_retryable());
    }

    #[test]
    fn corrupt_maps_to_invalid_data() {
        match WorldError::corrupt("crc mismatch") {
            WorldError::PersistenceIo(err) => assert_eq!(err.kind(), io::ErrorKind::InvalidData),
            other => panic!("unexpected error: {other}"),
        }
    }
}
