//! FIFO matchmaking queue

use std::collections::VecDeque;

use uuid::Uuid;

/// Waiting player. Lives only inside the queue; removed on match, manual
/// dequeue, or timeout.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub user_id: Uuid,
    pub display_name: String,
    pub entered_at_ms: i64,
    pub deadline_ms: i64,
}

/// Plain FIFO queue; callers provide the locking
pub struct MatchQueue {
    entries: VecDeque<QueueEntry>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Add a player. Rejects duplicates.
    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        if self.contains(entry.user_id) {
            return false;
        }
        self.entries.push_back(entry);
        true
    }

    /// Remove a player by id. Linear scan is fine at these queue sizes.
    pub fn dequeue(&mut self, user_id: Uuid) -> Option<QueueEntry> {
        let pos = self.entries.iter().position(|e| e.user_id == user_id)?;
        self.entries.remove(pos)
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.entries.iter().any(|e| e.user_id == user_id)
    }

    /// FIFO position of a player (0-based), if queued
    pub fn position(&self, user_id: Uuid) -> Option<usize> {
        self.entries.iter().position(|e| e.user_id == user_id)
    }

    /// Pop exactly `count` entries from the front when at least that many
    /// are waiting
    pub fn take_group(&mut self, count: usize) -> Option<Vec<QueueEntry>> {
        if self.entries.len() < count {
            return None;
        }
        Some(self.entries.drain(..count).collect())
    }

    /// Remove and return every entry whose deadline has passed
    pub fn take_expired(&mut self, now_ms: i64) -> Vec<QueueEntry> {
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            if now_ms >= e.deadline_ms {
                expired.push(e.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Average wait in milliseconds across the queue
    pub fn average_wait_ms(&self, now_ms: i64) -> i64 {
        if self.is_empty() {
            return 0;
        }
        let total: i64 = self.entries.iter().map(|e| now_ms - e.entered_at_ms).sum();
        total / self.entries.len() as i64
    }
}

impl Default for MatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
