//! Opaque deterministic simulation contract
//!
//! The lockstep engine never looks inside the game logic: it hands each
//! frame's canonical input set to `tick` and asks for byte snapshots when a
//! client needs to fast-forward after a reconnect.

use std::sync::Arc;

use bytes::Bytes;

use crate::registry::RoomRecord;
use crate::ws::protocol::FrameInputSet;

/// Deterministic game-logic world driven by the lockstep engine
pub trait Simulation: Send {
    /// Advance one frame with the canonical input set. An `Err` is
    /// session-fatal: the session ends rather than desyncing clients.
    fn tick(&mut self, frame: i32, inputs: &FrameInputSet) -> anyhow::Result<()>;

    /// Serialize the full world state at the current frame
    fn snapshot(&self) -> anyhow::Result<Bytes>;

    /// Replace the world state from a prior snapshot
    fn restore(&mut self, snapshot: &[u8]) -> anyhow::Result<()>;
}

/// Builds a fresh world for a room when its session starts
pub type SimulationFactory = Arc<dyn Fn(&RoomRecord) -> Box<dyn Simulation> + Send + Sync>;

/// Minimal placeholder world: counts frames and snapshots the counter.
/// Real game logic plugs in through [`SimulationFactory`].
pub struct CounterSimulation {
    frame: i32,
}

impl CounterSimulation {
    pub fn new() -> Self {
        Self { frame: 0 }
    }
}

impl Default for CounterSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation for CounterSimulation {
    fn tick(&mut self, frame: i32, _inputs: &FrameInputSet) -> anyhow::Result<()> {
        self.frame = frame;
        Ok(())
    }

    fn snapshot(&self) -> anyhow::Result<Bytes> {
        Ok(Bytes::copy_from_slice(&self.frame.to_le_bytes()))
    }

    fn restore(&mut self, snapshot: &[u8]) -> anyhow::Result<()> {
        let bytes: [u8; 4] = snapshot
            .try_into()
            .map_err(|_| anyhow::anyhow!("snapshot must be 4 bytes, got {}", snapshot.len()))?;
        self.frame = i32::from_le_bytes(bytes);
        Ok(())
    }
}
