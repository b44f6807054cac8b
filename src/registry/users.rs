//! User registry - transport session to user identity bookkeeping

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

/// Stable identity behind a transport session
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub display_name: String,
    pub current_room_id: Option<Uuid>,
}

/// Registry mapping transport sessions to user identities
pub struct UserRegistry {
    users: DashMap<Uuid, UserIdentity>,
    session_to_user: DashMap<Uuid, Uuid>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            session_to_user: DashMap::new(),
        }
    }

    /// Create an identity for a freshly connected session
    pub fn assign(&self, session_id: Uuid, display_name: String) -> UserIdentity {
        let identity = UserIdentity {
            user_id: Uuid::new_v4(),
            session_id,
            display_name,
            current_room_id: None,
        };
        self.session_to_user.insert(session_id, identity.user_id);
        self.users.insert(identity.user_id, identity.clone());
        info!(user_id = %identity.user_id, session_id = %session_id, name = %identity.display_name, "User assigned");
        identity
    }

    /// Destroy the identity bound to a session (disconnect)
    pub fn remove_by_session(&self, session_id: Uuid) -> Option<UserIdentity> {
        let (_, user_id) = self.session_to_user.remove(&session_id)?;
        let identity = self.users.remove(&user_id).map(|(_, u)| u);
        if let Some(ref u) = identity {
            info!(user_id = %u.user_id, session_id = %session_id, "User removed");
        }
        identity
    }

    pub fn lookup_by_session(&self, session_id: Uuid) -> Option<UserIdentity> {
        let user_id = *self.session_to_user.get(&session_id)?;
        self.users.get(&user_id).map(|u| u.value().clone())
    }

    pub fn lookup_by_user(&self, user_id: Uuid) -> Option<UserIdentity> {
        self.users.get(&user_id).map(|u| u.value().clone())
    }

    /// Transport session for a user, if they are currently connected.
    /// The session engine uses this as its reachability check.
    pub fn session_for_user(&self, user_id: Uuid) -> Option<Uuid> {
        self.users.get(&user_id).map(|u| u.session_id)
    }

    /// Record the room a user is in (None on leave)
    pub fn set_room(&self, user_id: Uuid, room_id: Option<Uuid>) -> bool {
        let Some(mut user) = self.users.get_mut(&user_id) else {
            return false;
        };
        user.current_room_id = room_id;
        true
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_then_lookup_both_ways() {
        let registry = UserRegistry::new();
        let session_id = Uuid::new_v4();
        let identity = registry.assign(session_id, "alice".to_string());

        let by_session = registry.lookup_by_session(session_id).unwrap();
        assert_eq!(by_session.user_id, identity.user_id);

        let by_user = registry.lookup_by_user(identity.user_id).unwrap();
        assert_eq!(by_user.session_id, session_id);
    }

    #[test]
    fn remove_clears_both_indexes() {
        let registry = UserRegistry::new();
        let session_id = Uuid::new_v4();
        let identity = registry.assign(session_id, "bob".to_string());

        let removed = registry.remove_by_session(session_id).unwrap();
        assert_eq!(removed.user_id, identity.user_id);
        assert!(registry.lookup_by_session(session_id).is_none());
        assert!(registry.session_for_user(identity.user_id).is_none());
    }

    #[test]
    fn set_room_tracks_membership() {
        let registry = UserRegistry::new();
        let identity = registry.assign(Uuid::new_v4(), "carol".to_string());
        let room_id = Uuid::new_v4();

        assert!(registry.set_room(identity.user_id, Some(room_id)));
        assert_eq!(
            registry.lookup_by_user(identity.user_id).unwrap().current_room_id,
            Some(room_id)
        );
    }
}
