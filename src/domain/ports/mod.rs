//! Domain ports (interfaces) to the two external collaborators the engine
//! depends on: the issue tracker and the coding-agent backend (§6).

pub mod agent;
pub mod tracker;

pub use agent::{AgentDetection, AgentEvent, AgentExecution, AgentPlugin, ExecuteOptions};
pub use tracker::{CompletionResult, TaskFilter, Tracker};
