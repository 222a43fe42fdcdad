//! Infrastructure adapters: concrete collaborators behind the domain ports.

pub mod git_cli;
pub mod mock_agent;
pub mod mock_tracker;

pub use mock_agent::{MockAgentPlugin, MockResponse as MockAgentResponse};
pub use mock_tracker::MockTracker;
