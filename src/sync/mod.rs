//! Lockstep frame-synchronization engine

pub mod host;
pub mod input_buffer;
pub mod session;
pub mod simulation;

pub use host::SessionRegistry;
pub use session::{Session, SessionCmd, SessionHandle};
pub use simulation::{CounterSimulation, Simulation, SimulationFactory};
