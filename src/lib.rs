pub mod app;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod launcher;
pub mod matching;
pub mod model;
pub mod monitor;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod store;
pub mod update;

// External tools driven through the shell
pub mod integrations {
    pub mod brew;
    pub mod docker;
}

pub use app::{App, AppEvent, Runtime, WorkerCommand};
pub use orchestrator::ProjectOrchestrator;
