pub mod orchestrator;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::{CycleReport, RefreshOrchestrator, PACING_DELAY};
pub use scheduler::{PollingScheduler, PollingState, SchedulerPhase};
