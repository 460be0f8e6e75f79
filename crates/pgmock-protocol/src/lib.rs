//! PostgreSQL v3.0 wire protocol: the big-endian codec and the message
//! catalog used by the mock server (and by its tests acting as a client).

pub mod backend;
pub mod codec;
pub mod error;
pub mod frontend;
pub mod messages;

pub use backend::{read_message, write_message};
pub use codec::WireCodec;
pub use error::ProtocolError;
pub use messages::{BackendMessage, FrontendMessage, StartupMessage, StartupPacket};

#[cfg(test)]
mod tests;
