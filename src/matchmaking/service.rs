//! Matchmaking service - pairs queued players into quick-match rooms

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MatchmakingConfig;
use crate::matchmaking::queue::{MatchQueue, QueueEntry};
use crate::registry::{RoomRegistry, RoomStatus, UserRegistry};
use crate::sync::SessionRegistry;
use crate::util::time::unix_millis;
use crate::ws::protocol::{GameConfig, GameRoomState, ServerMsg};
use crate::ws::transport::Transport;

/// Why an enqueue attempt was refused
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueError {
    AlreadyQueued,
    AlreadyInRoom,
}

pub struct MatchmakingService {
    cfg: MatchmakingConfig,
    queue: Mutex<MatchQueue>,
    users: Arc<UserRegistry>,
    rooms: Arc<RoomRegistry>,
    sessions: Arc<SessionRegistry>,
    transport: Arc<dyn Transport>,
    last_timeout_check_ms: Mutex<i64>,
}

impl MatchmakingService {
    pub fn new(
        cfg: MatchmakingConfig,
        users: Arc<UserRegistry>,
        rooms: Arc<RoomRegistry>,
        sessions: Arc<SessionRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            cfg,
            queue: Mutex::new(MatchQueue::new()),
            users,
            rooms,
            sessions,
            transport,
            last_timeout_check_ms: Mutex::new(unix_millis()),
        }
    }

    /// Enter the quick-match queue. Returns the FIFO position.
    pub fn enqueue(&self, user_id: Uuid, display_name: String) -> Result<usize, EnqueueError> {
        if let Some(user) = self.users.lookup_by_user(user_id) {
            if user.current_room_id.is_some() {
                warn!(user_id = %user_id, "Enqueue refused: already in a room");
                return Err(EnqueueError::AlreadyInRoom);
            }
        }

        let now = unix_millis();
        let entry = QueueEntry {
            user_id,
            display_name,
            entered_at_ms: now,
            deadline_ms: now + self.cfg.queue_timeout_ms,
        };

        let mut queue = self.queue.lock();
        if !queue.enqueue(entry) {
            warn!(user_id = %user_id, "Enqueue refused: already queued");
            return Err(EnqueueError::AlreadyQueued);
        }
        let position = queue.len() - 1;
        info!(user_id = %user_id, queue_size = queue.len(), "User joined match queue");
        Ok(position)
    }

    /// Leave the queue. False if the user was not queued.
    pub fn dequeue(&self, user_id: Uuid) -> bool {
        let removed = self.queue.lock().dequeue(user_id).is_some();
        if removed {
            info!(user_id = %user_id, "User left match queue");
        }
        removed
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn average_wait_ms(&self) -> i64 {
        self.queue.lock().average_wait_ms(unix_millis())
    }

    /// Periodic update: form matches, then expire stale entries on the
    /// timeout-check cadence. Called from the service loop; also directly
    /// from tests.
    pub fn update(&self, now_ms: i64) {
        self.sessions.prune_finished();
        self.match_waiting_players();

        let due = {
            let mut last = self.last_timeout_check_ms.lock();
            if now_ms - *last >= self.cfg.timeout_check_interval_ms {
                *last = now_ms;
                true
            } else {
                false
            }
        };
        if due {
            self.expire_entries(now_ms);
        }
    }

    /// Pop groups of `min_players` off the queue while enough are waiting
    fn match_waiting_players(&self) {
        loop {
            let group = {
                let mut queue = self.queue.lock();
                match queue.take_group(self.cfg.min_players) {
                    Some(group) => group,
                    None => break,
                }
            };
            self.create_quick_match(group);
        }
    }

    /// Create a Playing room for a matched group and start its session.
    /// Quick match skips any ready check.
    fn create_quick_match(&self, group: Vec<QueueEntry>) {
        let creator = &group[0];
        let room_name = format!("QuickMatch_{}", unix_millis());
        let room = self
            .rooms
            .create(&room_name, creator.user_id, self.cfg.max_quick_match_players);

        for entry in &group[1..] {
            if !self.rooms.join(room.room_id, entry.user_id) {
                warn!(room_id = %room.room_id, user_id = %entry.user_id, "Matched player failed to join room");
            }
        }
        for entry in &group {
            self.users.set_room(entry.user_id, Some(room.room_id));
        }

        self.rooms.set_status(room.room_id, RoomStatus::Playing);
        let Some(room) = self.rooms.get(room.room_id) else {
            warn!(room_id = %room.room_id, "Quick-match room vanished before start");
            return;
        };

        self.notify_game_start(&room.room_id, &room.member_ids, room.game_start_time);
        self.sessions.start_session(&room);

        let names: Vec<&str> = group.iter().map(|e| e.display_name.as_str()).collect();
        info!(
            room_id = %room.room_id,
            players = room.member_ids.len(),
            names = ?names,
            "Quick match created"
        );
    }

    fn notify_game_start(&self, room_id: &Uuid, member_ids: &[Uuid], start_time: Option<i64>) {
        let now = unix_millis();
        let config = GameConfig {
            max_players: self.cfg.max_quick_match_players,
            min_players: self.cfg.min_players as u32,
            ..GameConfig::default()
        };
        let msg = ServerMsg::GameStart {
            room_id: *room_id,
            config,
            room_state: GameRoomState {
                room_id: *room_id,
                current_round: 1,
                max_rounds: 3,
                round_start_time: now,
                active_players: member_ids.to_vec(),
            },
            start_time_ms: start_time.unwrap_or(now),
            player_ids: member_ids.to_vec(),
        };

        for user_id in member_ids {
            let Some(session_id) = self.users.session_for_user(*user_id) else {
                continue;
            };
            if let Err(e) = self.transport.send(session_id, &msg) {
                warn!(user_id = %user_id, error = %e, "Game start send failed");
            }
        }
    }

    /// Dequeue entries past their deadline and tell each one exactly once
    fn expire_entries(&self, now_ms: i64) {
        let expired = self.queue.lock().take_expired(now_ms);
        for entry in expired {
            let waited_secs = (now_ms - entry.entered_at_ms) / 1000;
            info!(
                user_id = %entry.user_id,
                name = %entry.display_name,
                waited_secs,
                "Match queue entry timed out"
            );

            let Some(session_id) = self.users.session_for_user(entry.user_id) else {
                continue;
            };
            let msg = ServerMsg::MatchTimeout {
                message: "No match found, please try again".to_string(),
                timestamp_ms: now_ms,
                wait_time_seconds: waited_secs,
            };
            if let Err(e) = self.transport.send(session_id, &msg) {
                warn!(user_id = %entry.user_id, error = %e, "Timeout notification send failed");
            }
        }
    }

    /// Run the periodic matchmaking loop
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(500));
        loop {
            ticker.tick().await;
            self.update(unix_millis());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::sync::simulation::{CounterSimulation, Simulation};
    use crate::ws::transport::TransportError;

    struct RecordingTransport {
        sent: Mutex<Vec<(Uuid, ServerMsg)>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn messages(&self) -> Vec<(Uuid, ServerMsg)> {
            self.sent.lock().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, session_id: Uuid, msg: &ServerMsg) -> Result<(), TransportError> {
            self.sent.lock().push((session_id, msg.clone()));
            Ok(())
        }
    }

    struct Fixture {
        service: MatchmakingService,
        users: Arc<UserRegistry>,
        rooms: Arc<RoomRegistry>,
        transport: Arc<RecordingTransport>,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(UserRegistry::new());
        let rooms = Arc::new(RoomRegistry::new());
        let transport = RecordingTransport::new();
        let sessions = Arc::new(SessionRegistry::new(
            SyncConfig::default(),
            users.clone(),
            rooms.clone(),
            transport.clone(),
            Arc::new(|_room| Box::new(CounterSimulation::new()) as Box<dyn Simulation>),
        ));
        let service = MatchmakingService::new(
            MatchmakingConfig::default(),
            users.clone(),
            rooms.clone(),
            sessions,
            transport.clone(),
        );
        Fixture {
            service,
            users,
            rooms,
            transport,
        }
    }

    fn connect(fx: &Fixture, name: &str) -> Uuid {
        fx.users.assign(Uuid::new_v4(), name.to_string()).user_id
    }

    #[test]
    fn enqueue_rejects_duplicates_and_room_members() {
        let fx = fixture();
        let user = connect(&fx, "a");

        assert_eq!(fx.service.enqueue(user, "a".to_string()), Ok(0));
        assert_eq!(
            fx.service.enqueue(user, "a".to_string()),
            Err(EnqueueError::AlreadyQueued)
        );

        let roomed = connect(&fx, "b");
        fx.users.set_room(roomed, Some(Uuid::new_v4()));
        assert_eq!(
            fx.service.enqueue(roomed, "b".to_string()),
            Err(EnqueueError::AlreadyInRoom)
        );
    }

    #[tokio::test]
    async fn three_queued_players_pair_first_two_and_leave_third() {
        let fx = fixture();
        let p1 = connect(&fx, "p1");
        let p2 = connect(&fx, "p2");
        let p3 = connect(&fx, "p3");

        fx.service.enqueue(p1, "p1".to_string()).unwrap();
        fx.service.enqueue(p2, "p2".to_string()).unwrap();
        fx.service.enqueue(p3, "p3".to_string()).unwrap();

        fx.service.update(unix_millis());

        // P1 and P2 share a Playing room, P3 is still waiting
        assert_eq!(fx.service.queue_size(), 1);
        let room_id = fx.users.lookup_by_user(p1).unwrap().current_room_id.unwrap();
        let room = fx.rooms.get(room_id).unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert!(room.member_ids.contains(&p2));
        assert!(!room.member_ids.contains(&p3));
        assert!(fx.users.lookup_by_user(p3).unwrap().current_room_id.is_none());

        // Both matched players got a game start
        let starts = fx
            .transport
            .messages()
            .iter()
            .filter(|(_, m)| matches!(m, ServerMsg::GameStart { .. }))
            .count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn lone_queued_player_times_out_with_one_notification() {
        let fx = fixture();
        let user = connect(&fx, "solo");
        fx.service.enqueue(user, "solo".to_string()).unwrap();

        // Force the queue entry far past its deadline and the checker past
        // its cadence
        let later = unix_millis() + 70_000;
        fx.service.update(later);

        assert_eq!(fx.service.queue_size(), 0);
        let timeouts: Vec<i64> = fx
            .transport
            .messages()
            .into_iter()
            .filter_map(|(_, m)| match m {
                ServerMsg::MatchTimeout {
                    wait_time_seconds, ..
                } => Some(wait_time_seconds),
                _ => None,
            })
            .collect();
        assert_eq!(timeouts.len(), 1);
        // Waited roughly the configured 60s timeout
        assert!(timeouts[0] >= 60 && timeouts[0] <= 75);

        // A second scan sends nothing further
        fx.service.update(later + 10_000);
        let again = fx
            .transport
            .messages()
            .iter()
            .filter(|(_, m)| matches!(m, ServerMsg::MatchTimeout { .. }))
            .count();
        assert_eq!(again, 1);
    }

    #[tokio::test]
    async fn four_players_form_two_pairs() {
        let fx = fixture();
        let ids: Vec<Uuid> = (0..4).map(|i| connect(&fx, &format!("p{i}"))).collect();
        for (i, id) in ids.iter().enumerate() {
            fx.service.enqueue(*id, format!("p{i}")).unwrap();
        }

        fx.service.update(unix_millis());
        assert_eq!(fx.service.queue_size(), 0);

        let room_a = fx.users.lookup_by_user(ids[0]).unwrap().current_room_id;
        let room_b = fx.users.lookup_by_user(ids[2]).unwrap().current_room_id;
        assert!(room_a.is_some());
        assert!(room_b.is_some());
        assert_ne!(room_a, room_b);
    }
}
