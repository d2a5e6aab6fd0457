//! # Network
//!
//! The link between clients and the authoritative server: one TCP connection
//! per client carrying newline-delimited JSON frames, with calls flowing in
//! both directions.
//!
//! * [`protocol`] - Frame and message types
//! * [`transport`] - The multiplexed connection, deadlines and retries
//! * [`server`] - The authority
//! * [`client`] - The client end, used by `RemoteSource` and the frame loop

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::WorldClient;
pub use server::{ServerHandle, WorldServer};
