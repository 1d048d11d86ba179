//! The binary protocol both sides speak. `frame` holds the little-endian
//! primitive layer and quantization helpers, `packet` the message table and
//! their bit-exact encodings.

pub mod frame;
pub mod packet;

pub use frame::{FrameReader, FrameWriter};
pub use packet::{ClientPacket, PlayerSnapshot, ServerPacket};
