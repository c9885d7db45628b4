// Library exports for the procwatch process supervisor

#[cfg(not(unix))]
compile_error!("procwatch supports unix platforms only");

pub mod cli;
pub mod config;
pub mod error;
pub mod process;

pub use error::{ProcwatchError, Result};
pub use process::{ProcessHandle, ProcessOptions, ProcessSpec, ProcessStatus, RestartBudget};
