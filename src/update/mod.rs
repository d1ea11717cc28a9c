//! Self-update: manifest check, verified download, staging and the detached
//! bundle swap.

pub mod manager;
pub mod source;
pub mod stage;
pub mod verify;
pub mod version;

pub use manager::{UpdateCheck, UpdateManager, UpdateState};
pub use source::{HttpSource, UpdateSource};
pub use stage::{DiskImageStager, HelperStager, ReplacementPlan, Stager};
