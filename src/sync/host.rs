//! Per-room session hosting and input routing

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::registry::{RoomRecord, RoomRegistry, RoomStatus, UserRegistry};
use crate::sync::session::{Session, SessionCmd, SessionHandle};
use crate::sync::simulation::SimulationFactory;
use crate::ws::protocol::SingleInput;
use crate::ws::transport::Transport;

/// Launches and tracks session actors, one per playing room
pub struct SessionRegistry {
    cfg: SyncConfig,
    users: Arc<UserRegistry>,
    rooms: Arc<RoomRegistry>,
    transport: Arc<dyn Transport>,
    sim_factory: SimulationFactory,
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new(
        cfg: SyncConfig,
        users: Arc<UserRegistry>,
        rooms: Arc<RoomRegistry>,
        transport: Arc<dyn Transport>,
        sim_factory: SimulationFactory,
    ) -> Self {
        Self {
            cfg,
            users,
            rooms,
            transport,
            sim_factory,
            sessions: DashMap::new(),
        }
    }

    /// Create and start the session for a room that just went Playing.
    /// A second call for the same room routes a Start command instead,
    /// which the running session treats as a reconnect.
    pub fn start_session(&self, room: &RoomRecord) {
        if let Some(handle) = self.sessions.get(&room.room_id) {
            handle.send(SessionCmd::Start);
            return;
        }

        let world = (self.sim_factory)(room);
        let session = Session::new(
            room,
            self.cfg,
            world,
            self.users.clone(),
            self.rooms.clone(),
            self.transport.clone(),
        );

        self.sessions.insert(room.room_id, session.spawn());
        info!(room_id = %room.room_id, "Session launched");
    }

    /// Route a user's input to their room's session
    pub fn route_input(&self, user_id: Uuid, input: SingleInput) {
        let Some(room_id) = self
            .users
            .lookup_by_user(user_id)
            .and_then(|u| u.current_room_id)
        else {
            warn!(user_id = %user_id, "Input from user without a room");
            return;
        };

        let Some(handle) = self.sessions.get(&room_id) else {
            warn!(room_id = %room_id, user_id = %user_id, "Input for room without a session");
            return;
        };
        handle.send(SessionCmd::Input { user_id, input });
    }

    /// Ask a user's running session to resend the start snapshot
    pub fn request_reconnect(&self, user_id: Uuid) {
        let Some(room_id) = self
            .users
            .lookup_by_user(user_id)
            .and_then(|u| u.current_room_id)
        else {
            return;
        };
        if let Some(handle) = self.sessions.get(&room_id) {
            handle.send(SessionCmd::Start);
        }
    }

    /// Stop a room's session and forget it
    pub fn stop_session(&self, room_id: Uuid, reason: &str) {
        if let Some((_, handle)) = self.sessions.remove(&room_id) {
            handle.send(SessionCmd::Stop {
                reason: reason.to_string(),
            });
            info!(room_id = %room_id, reason, "Session stopped");
        }
    }

    /// Forget sessions that have finished. A session marks its room Ended
    /// when it stops itself, so the room status is the liveness signal.
    pub fn prune_finished(&self) {
        self.sessions.retain(|room_id, _| match self.rooms.get(*room_id) {
            Some(room) => {
                if room.status == RoomStatus::Ended {
                    info!(room_id = %room_id, "Finished session pruned");
                    false
                } else {
                    true
                }
            }
            None => false,
        });
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
