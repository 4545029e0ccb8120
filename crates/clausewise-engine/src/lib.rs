//! Analysis engine: fans a contract's clauses out to concurrent units,
//! collects their outcomes, and assembles the compliance report.

pub mod assembler;
pub mod orchestrator;
pub mod service;
pub mod slots;

#[cfg(test)]
mod testing;

pub use assembler::{AssemblyError, ReportAssembler};
pub use orchestrator::{AnalysisRun, Orchestrator, OrchestratorBuilder, RunState, TransitionError};
pub use service::{AnalysisService, EngineError, SavedReport};
pub use slots::{ResultSlots, SlotError};
