use crate::error::{ProcwatchError, Result};
use crate::process::types::ProcessStatus;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of OS-reported run state for a PID
pub trait StatusSource: Send + 'static {
    fn read_status(&mut self, pid: u32) -> Result<ProcessStatus>;
}

/// Status source backed by `sysinfo`
pub struct SysinfoStatus {
    system: System,
}

impl SysinfoStatus {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSource for SysinfoStatus {
    fn read_status(&mut self, pid: u32) -> Result<ProcessStatus> {
        let sys_pid = Pid::from_u32(pid);

        // Refresh only this process; status needs no extra refresh kinds
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new(),
        );

        self.system
            .process(sys_pid)
            .map(|process| map_status(process.status()))
            .ok_or_else(|| ProcwatchError::StatusRead(format!("process {} not found", pid)))
    }
}

fn map_status(status: sysinfo::ProcessStatus) -> ProcessStatus {
    use sysinfo::ProcessStatus as Os;

    match status {
        Os::Run => ProcessStatus::Running,
        Os::Sleep => ProcessStatus::Sleeping,
        Os::UninterruptibleDiskSleep => ProcessStatus::DiskSleep,
        Os::Stop => ProcessStatus::Stopped,
        Os::Tracing => ProcessStatus::Tracing,
        Os::Idle => ProcessStatus::Idle,
        Os::Zombie => ProcessStatus::Zombie,
        Os::Dead => ProcessStatus::Dead,
        _ => ProcessStatus::Unavailable,
    }
}
