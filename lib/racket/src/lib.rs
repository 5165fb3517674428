//! The networking engine for the game server: wire codec, client roster and
//! the readiness-driven endpoint multiplexing both transports.

/// Number of player slots the server maintains. The protocol carries one
/// ball position plus one paddle position per slot in every snapshot.
pub const MAX_CLIENTS: usize = 2;

pub mod shared;
pub mod wire;
pub mod roster;
pub mod endpoint;
