// Process module - supervision of a single OS process

pub mod control;
mod handle;
pub mod liveness;
pub mod status;
mod supervisor;
pub mod types;
pub mod watchdog;

pub use control::{OsProcess, ProcessControl};
pub use handle::ProcessHandle;
pub use status::{StatusSource, SysinfoStatus};
pub use types::{
    OutputTarget, ProcessOptions, ProcessSpec, ProcessStatus, RestartBudget,
    DEFAULT_POLL_INTERVAL, INFINITE_RESTARTS,
};
