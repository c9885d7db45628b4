use crate::error::{ProcwatchError, Result};
use crate::process::control::{OsProcess, ProcessControl};
use crate::process::status::{StatusSource, SysinfoStatus};
use crate::process::supervisor::{Request, Supervisor};
use crate::process::types::{ProcessSpec, ProcessStatus, RestartBudget};
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct HandleInfo {
    name: String,
    command: PathBuf,
    args: Vec<String>,
}

/// Caller-side handle to a supervised process.
///
/// Cheap to clone. Every operation is a message to the process's watchdog
/// task, which owns the OS process exclusively; once the watchdog has exited
/// (after `delete` or `cancel`) operations fail with
/// [`ProcwatchError::SupervisorGone`].
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    info: Arc<HandleInfo>,
    requests: mpsc::UnboundedSender<Request>,
    cancel: CancellationToken,
}

impl ProcessHandle {
    /// Launch `spec` as an OS process and start its watchdog
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(spec: ProcessSpec) -> Result<Self> {
        Self::launch_with(spec, OsProcess::new(), SysinfoStatus::new())
    }

    /// Launch with a custom process control and status source
    pub fn launch_with<C, S>(spec: ProcessSpec, control: C, status: S) -> Result<Self>
    where
        C: ProcessControl,
        S: StatusSource,
    {
        let info = Arc::new(HandleInfo {
            name: spec.name.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut supervisor = Supervisor::new(spec, control, status, cancel.clone(), rx);
        supervisor.launch()?;
        tokio::spawn(supervisor.run());

        Ok(Self {
            info,
            requests: tx,
            cancel,
        })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn command(&self) -> &Path {
        &self.info.command
    }

    pub fn args(&self) -> &[String] {
        &self.info.args
    }

    async fn call<T>(&self, request: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(request(tx))
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    fn gone(&self) -> ProcwatchError {
        ProcwatchError::SupervisorGone(self.info.name.clone())
    }

    /// PID of the running process, `None` while it is not running
    pub async fn pid(&self) -> Result<Option<u32>> {
        self.call(Request::Pid).await
    }

    /// Time of the last successful launch, cleared on stop
    pub async fn start_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.call(Request::StartTime).await
    }

    pub async fn uptime(&self) -> Result<Option<Duration>> {
        let started = self.start_time().await?;
        Ok(started.map(|t| (Utc::now() - t).to_std().unwrap_or_default()))
    }

    /// Fresh status reading, independent of the watchdog's last observation
    pub async fn status(&self) -> Result<ProcessStatus> {
        self.call(Request::Status).await
    }

    pub async fn is_alive(&self) -> Result<bool> {
        self.call(Request::IsAlive).await
    }

    pub async fn restarts_remaining(&self) -> Result<RestartBudget> {
        self.call(Request::RestartsRemaining).await
    }

    /// Send SIGTERM. Does not wait for the process to exit.
    pub async fn stop(&self) -> Result<()> {
        self.call(Request::Stop).await?
    }

    /// Send SIGKILL and release the OS handle
    pub async fn kill(&self) -> Result<()> {
        self.call(Request::Kill).await?
    }

    pub async fn signal(&self, signal: Signal) -> Result<()> {
        self.call(|reply| Request::Signal(signal, reply)).await?
    }

    /// Stop, wait for exit and launch again. Returns the new PID.
    ///
    /// Manual restarts do not consume the automatic restart budget.
    pub async fn restart(&self) -> Result<u32> {
        self.call(Request::Restart).await?
    }

    /// Resolve with the exit status once the process has exited and been reaped
    pub async fn wait(&self) -> Result<ExitStatus> {
        self.call(Request::Wait).await?
    }

    /// Stop the process (gracefully, falling back to SIGKILL) and shut the
    /// watchdog down. The notification sink is closed once the watchdog exits.
    pub async fn delete(&self) -> Result<()> {
        self.call(Request::Delete).await?
    }

    /// Stop the watchdog without touching the process. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that stops the watchdog when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves once the watchdog task has exited
    pub async fn closed(&self) {
        self.requests.closed().await
    }
}
