//! On-demand source search.

mod orchestrator;

pub use orchestrator::SearchOrchestrator;
