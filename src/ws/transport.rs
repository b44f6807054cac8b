//! Outbound message routing
//!
//! The engine only ever sees the `Transport` trait; the WebSocket layer
//! registers one outbound channel per connection. Sends are fire-and-forget
//! so a slow or disconnected client can never stall a room's tick.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Send failures are transient operational errors: the caller logs and moves on.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no connection for session {0}")]
    Unknown(Uuid),

    #[error("connection for session {0} is closed")]
    Closed(Uuid),
}

/// Best-effort message delivery to a transport session
pub trait Transport: Send + Sync {
    fn send(&self, session_id: Uuid, msg: &ServerMsg) -> Result<(), TransportError>;
}

/// WebSocket-backed transport: session id -> outbound channel
pub struct WsTransport {
    outbound: DashMap<Uuid, mpsc::UnboundedSender<ServerMsg>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            outbound: DashMap::new(),
        }
    }

    /// Register a connection's outbound channel
    pub fn register(&self, session_id: Uuid, tx: mpsc::UnboundedSender<ServerMsg>) {
        self.outbound.insert(session_id, tx);
    }

    /// Remove a connection on disconnect
    pub fn unregister(&self, session_id: Uuid) {
        self.outbound.remove(&session_id);
    }

    pub fn connection_count(&self) -> usize {
        self.outbound.len()
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn send(&self, session_id: Uuid, msg: &ServerMsg) -> Result<(), TransportError> {
        let Some(tx) = self.outbound.get(&session_id) else {
            return Err(TransportError::Unknown(session_id));
        };
        tx.send(msg.clone())
            .map_err(|_| TransportError::Closed(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_to_unknown_session_fails() {
        let transport = WsTransport::new();
        let result = transport.send(Uuid::new_v4(), &ServerMsg::Pong { t: 1 });
        assert!(matches!(result, Err(TransportError::Unknown(_))));
    }

    #[test]
    fn registered_session_receives_messages() {
        let transport = WsTransport::new();
        let session_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.register(session_id, tx);

        transport.send(session_id, &ServerMsg::Pong { t: 7 }).unwrap();
        match rx.try_recv().unwrap() {
            ServerMsg::Pong { t } => assert_eq!(t, 7),
            other => panic!("unexpected message: {:?}", other),
        }

        transport.unregister(session_id);
        assert!(transport.send(session_id, &ServerMsg::Pong { t: 8 }).is_err());
    }
}
