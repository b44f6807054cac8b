pub mod handler;
pub mod protocol;
pub mod transport;

pub use transport::{Transport, TransportError, WsTransport};
