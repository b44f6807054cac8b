//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::matchmaking::MatchmakingService;
use crate::registry::{RoomRegistry, UserRegistry};
use crate::sync::{SessionRegistry, SimulationFactory};
use crate::ws::WsTransport;

/// Shared application state. Every service is constructed here and handed
/// its collaborators explicitly; nothing reaches for ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<UserRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub transport: Arc<WsTransport>,
    pub sessions: Arc<SessionRegistry>,
    pub matchmaking: Arc<MatchmakingService>,
}

impl AppState {
    pub fn new(config: Config, sim_factory: SimulationFactory) -> Self {
        let config = Arc::new(config);

        let users = Arc::new(UserRegistry::new());
        let rooms = Arc::new(RoomRegistry::new());
        let transport = Arc::new(WsTransport::new());

        let sessions = Arc::new(SessionRegistry::new(
            config.sync,
            users.clone(),
            rooms.clone(),
            transport.clone(),
            sim_factory,
        ));

        let matchmaking = Arc::new(MatchmakingService::new(
            config.matchmaking,
            users.clone(),
            rooms.clone(),
            sessions.clone(),
            transport.clone(),
        ));

        Self {
            config,
            users,
            rooms,
            transport,
            sessions,
            matchmaking,
        }
    }
}
