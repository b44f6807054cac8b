//! Per-session input buffer with late/early clamping and gap filling
//!
//! One canonical `PlayerInput` per (frame, player_id). The buffer keeps a
//! sliding window of frames so memory is bounded regardless of match length.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::ws::protocol::{FrameInputSet, PlayerInput};

pub struct InputBuffer {
    cfg: SyncConfig,
    /// frame -> player id -> input
    frames: HashMap<i32, HashMap<i64, PlayerInput>>,
    /// Every non-zero player id that has submitted input in this session.
    /// Collected frame sets are total over this set.
    uploaded_player_ids: BTreeSet<i64>,
    last_sweep_frame: i32,
}

impl InputBuffer {
    pub fn new(cfg: SyncConfig) -> Self {
        Self {
            cfg,
            frames: HashMap::new(),
            uploaded_player_ids: BTreeSet::new(),
            last_sweep_frame: 0,
        }
    }

    /// Store one input, clamping its frame into the window
    /// `[authority_frame + 1, authority_frame + input_cache_frames]`.
    /// Late inputs are refiled under the next uncommitted frame; inputs
    /// claiming an absurdly distant future are clamped to the window edge.
    pub fn store(&mut self, authority_frame: i32, mut input: PlayerInput) {
        // Player id 0 means "no mapping yet": never treat it as a participant
        if input.player_id != 0 {
            self.uploaded_player_ids.insert(input.player_id);
        }

        if input.frame < authority_frame + 1 {
            debug!(
                player_id = input.player_id,
                frame = input.frame,
                refiled = authority_frame + 1,
                "Late input refiled under next frame"
            );
            input.frame = authority_frame + 1;
        }

        let max_frame = authority_frame + self.cfg.input_cache_frames;
        if input.frame > max_frame {
            warn!(
                player_id = input.player_id,
                frame = input.frame,
                clamped = max_frame,
                "Input too far ahead, clamped to cache window"
            );
            input.frame = max_frame;
        }

        self.frames
            .entry(input.frame)
            .or_default()
            .insert(input.player_id, input);
    }

    /// Build the canonical input set for one frame. Total over every player
    /// that has ever uploaded: a missing entry is filled from the player's
    /// most recent input within `backfill_search_frames`, restamped to this
    /// frame, or a neutral default when none exists.
    pub fn collect(&self, frame: i32, timestamp: i64) -> FrameInputSet {
        let mut set = FrameInputSet::new();
        let this_frame = self.frames.get(&frame);

        for &player_id in &self.uploaded_player_ids {
            if let Some(input) = this_frame.and_then(|inputs| inputs.get(&player_id)) {
                set.insert(player_id, input.clone());
            } else if let Some(prior) = self.previous_input(player_id, frame) {
                set.insert(player_id, prior.restamped(frame, timestamp));
            } else {
                set.insert(player_id, PlayerInput::neutral(player_id, frame, timestamp));
            }
        }

        set
    }

    /// Most recent stored input for a player strictly before `frame`,
    /// searching back at most `backfill_search_frames`.
    fn previous_input(&self, player_id: i64, frame: i32) -> Option<&PlayerInput> {
        let floor = (frame - self.cfg.backfill_search_frames).max(0);
        (floor..frame)
            .rev()
            .find_map(|f| self.frames.get(&f).and_then(|inputs| inputs.get(&player_id)))
    }

    /// Drop frames older than the cache window. Runs at most once per
    /// `cache_sweep_interval` frames.
    pub fn sweep(&mut self, authority_frame: i32) {
        if authority_frame - self.last_sweep_frame < self.cfg.cache_sweep_interval {
            return;
        }
        self.last_sweep_frame = authority_frame;

        let cutoff = authority_frame - self.cfg.input_cache_frames;
        let before = self.frames.len();
        self.frames.retain(|&frame, _| frame >= cutoff);
        let dropped = before - self.frames.len();
        if dropped > 0 {
            debug!(dropped, cached = self.frames.len(), "Swept expired input frames");
        }
    }

    /// Player ids that have ever uploaded input
    pub fn uploaded_player_ids(&self) -> &BTreeSet<i64> {
        &self.uploaded_player_ids
    }

    pub fn cached_frame_count(&self) -> usize {
        self.frames.len()
    }

    #[cfg(test)]
    fn has_frame(&self, frame: i32) -> bool {
        self.frames.contains_key(&frame)
    }
}
