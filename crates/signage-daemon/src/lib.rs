pub mod compiler;
pub mod error;
pub mod fetcher;
pub mod manifest;
pub mod orchestrator;
pub mod scheduler;
pub mod summary;

pub use error::{CoreError, Result, SchemaError};
pub use orchestrator::{InitReport, Initialization, Orchestrator};
pub use scheduler::{CycleScheduler, Presenter};
