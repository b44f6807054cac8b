//! Concurrent CRUD registries for users and rooms

pub mod rooms;
pub mod users;

pub use rooms::{RoomRecord, RoomRegistry, RoomStatus};
pub use users::{UserIdentity, UserRegistry};
