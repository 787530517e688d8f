//! Capture loop, frame timing and pipeline health observation

pub mod clock;
pub mod monitor;
pub mod orchestrator;

pub use clock::FrameClock;
pub use monitor::{MonitorExit, MonitorReport};
pub use orchestrator::{LoopExit, LoopReport, Orchestrator, RunReport, StartupError, StopSignal};
