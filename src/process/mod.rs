//! Process termination and listening-port inspection.

pub mod kill;
pub mod ports;
