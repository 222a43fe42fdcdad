//! Domain layer: entities, events, and port traits for the parallel execution engine.
//!
//! Nothing in this module performs I/O. Concrete collaborators (git, trackers,
//! agent subprocesses) live under `application` and `adapters`.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{ConfigError, EngineError, GraphError};
