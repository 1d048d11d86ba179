//! The authoritative side of the world: persistence, generation, build
//! validation, rooms and their periodic loops. Network transports (the
//! WebSocket/HTTP layer) live outside this crate and talk to it through
//! [`room::Connection`], [`room::dispatch`] and [`room::RoomManager`].

pub mod build;
pub mod provider;
pub mod rate_limit;
pub mod room;
pub mod store;
pub mod surface;

pub use room::{Connection, MessageRegistry, Room, RoomManager};
