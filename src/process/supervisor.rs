use crate::error::{ProcwatchError, Result};
use crate::process::control::ProcessControl;
use crate::process::liveness;
use crate::process::status::StatusSource;
use crate::process::types::{ProcessSpec, ProcessStatus, RestartBudget};
use crate::process::watchdog::{RestartDecision, Transition, WatchEvent, Watchdog};
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often a pending wait checks for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type Reply<T> = oneshot::Sender<Result<T>>;

/// Caller parked until the current process instance has exited
enum ExitWaiter {
    Wait(Reply<ExitStatus>),
    /// `None` when the delete was triggered by the last handle going away
    Delete(Option<Reply<()>>),
    Restart(Reply<u32>),
}

/// Requests from `ProcessHandle` to the watchdog task
pub(crate) enum Request {
    Pid(oneshot::Sender<Option<u32>>),
    StartTime(oneshot::Sender<Option<DateTime<Utc>>>),
    Status(oneshot::Sender<ProcessStatus>),
    IsAlive(oneshot::Sender<bool>),
    RestartsRemaining(oneshot::Sender<RestartBudget>),
    Stop(Reply<()>),
    Kill(Reply<()>),
    Signal(Signal, Reply<()>),
    Restart(Reply<u32>),
    Wait(Reply<ExitStatus>),
    Delete(Reply<()>),
}

/// Single owner of one supervised OS process.
///
/// Runs as one tokio task. Launching, signaling, reaping and automatic
/// restarts all happen here, so the process handle and start time are never
/// written from two places at once.
pub(crate) struct Supervisor<C, S> {
    spec: ProcessSpec,
    control: C,
    status: S,
    start_time: Option<DateTime<Utc>>,
    watchdog: Watchdog,
    notify: Option<mpsc::Sender<ProcessStatus>>,
    cancel: CancellationToken,
    requests: mpsc::UnboundedReceiver<Request>,
    /// Set once every handle is gone
    detached: bool,
    waiters: Vec<ExitWaiter>,
}

impl<C: ProcessControl, S: StatusSource> Supervisor<C, S> {
    pub(crate) fn new(
        mut spec: ProcessSpec,
        control: C,
        status: S,
        cancel: CancellationToken,
        requests: mpsc::UnboundedReceiver<Request>,
    ) -> Self {
        let notify = spec.options.notify.take();
        let watchdog = Watchdog::new(spec.options.restart_budget);

        Self {
            spec,
            control,
            status,
            start_time: None,
            watchdog,
            notify,
            cancel,
            requests,
            detached: false,
            waiters: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    fn no_process(&self) -> ProcwatchError {
        ProcwatchError::NoProcess(self.spec.name.clone())
    }

    /// Start the OS process and record the start time
    pub(crate) fn launch(&mut self) -> Result<u32> {
        let cwd = match &self.spec.options.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()
                .map_err(|e| ProcwatchError::Environment(e.to_string()))?,
        };

        let pid = self
            .control
            .start(&self.spec, &cwd)
            .map_err(|source| ProcwatchError::Launch {
                command: self.spec.command_name(),
                source,
            })?;
        self.start_time = Some(Utc::now());

        if let Err(e) = self.status.read_status(pid) {
            debug!(process = %self.name(), pid, "Initial status read failed: {}", e);
        }

        info!(process = %self.name(), pid, "Process started");
        Ok(pid)
    }

    /// Send SIGTERM; exit is not awaited
    fn stop_graceful(&mut self) -> Result<()> {
        let pid = self.control.pid().ok_or_else(|| self.no_process())?;

        self.control
            .signal(Some(Signal::SIGTERM))
            .map_err(|e| {
                ProcwatchError::Signal(format!(
                    "process {} (pid {}) termination unsuccessful: {}",
                    self.spec.name, pid, e
                ))
            })?;

        self.start_time = None;
        debug!(process = %self.name(), pid, "Sent SIGTERM");
        Ok(())
    }

    /// Send SIGKILL and drop the OS handle
    fn stop_forced(&mut self) -> Result<()> {
        let pid = self.control.pid().ok_or_else(|| self.no_process())?;

        self.control
            .signal(Some(Signal::SIGKILL))
            .map_err(|e| {
                ProcwatchError::Signal(format!(
                    "process {} (pid {}) forced termination unsuccessful: {}",
                    self.spec.name, pid, e
                ))
            })?;
        self.control.release().map_err(|e| {
            ProcwatchError::Release(format!("process {} (pid {}): {}", self.spec.name, pid, e))
        })?;

        self.start_time = None;
        debug!(process = %self.name(), pid, "Sent SIGKILL and released process");
        Ok(())
    }

    fn send_signal(&mut self, signal: Signal) -> Result<()> {
        let pid = self.control.pid().ok_or_else(|| self.no_process())?;

        self.control.signal(Some(signal)).map_err(|e| {
            ProcwatchError::Signal(format!(
                "failed to send {} to process {} (pid {}): {}",
                signal, self.spec.name, pid, e
            ))
        })
    }

    fn gone(&self) -> ProcwatchError {
        ProcwatchError::SupervisorGone(self.spec.name.clone())
    }

    /// A delete or restart is parked waiting for the process to exit
    fn stop_in_progress(&self) -> bool {
        self.waiters
            .iter()
            .any(|waiter| !matches!(waiter, ExitWaiter::Wait(_)))
    }

    /// Graceful stop with forced fallback. The watchdog shuts down once the
    /// process has exited, or right away when the fallback had to be used.
    fn delete(&mut self, reply: Option<Reply<()>>) {
        let already_deleting = self
            .waiters
            .iter()
            .any(|waiter| matches!(waiter, ExitWaiter::Delete(_)));
        if already_deleting {
            if let Some(reply) = reply {
                let _ = reply.send(Err(ProcwatchError::Busy(self.spec.name.clone())));
            }
            return;
        }

        match self.stop_graceful() {
            Ok(()) => {
                self.waiters.push(ExitWaiter::Delete(reply));
                self.check_waiters();
            }
            Err(graceful) => {
                warn!(
                    process = %self.name(),
                    "Cannot stop process, trying force stop: {}", graceful
                );
                let result = self
                    .stop_forced()
                    .map_err(|forced| ProcwatchError::DeleteFailed {
                        name: self.spec.name.clone(),
                        graceful: Box::new(graceful),
                        forced: Box::new(forced),
                    });
                self.finish_delete(reply, result);
            }
        }
    }

    fn finish_delete(&mut self, reply: Option<Reply<()>>, result: Result<()>) {
        self.cancel.cancel();
        debug!(process = %self.name(), "Process deleted");

        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    error!(process = %self.name(), "Failed to terminate process: {}", e);
                }
            }
        }
    }

    /// Manual restart: stop, then relaunch once the process has exited
    fn restart(&mut self, reply: Reply<u32>) {
        if self.stop_in_progress() {
            let _ = reply.send(Err(ProcwatchError::Busy(self.spec.name.clone())));
            return;
        }

        // Exited and reaped, but not yet noticed by a tick
        if self.control.pid().is_some() && !liveness::is_alive(&self.control) {
            self.on_terminated();
        }

        match self.stop_graceful() {
            Ok(()) => {
                self.waiters.push(ExitWaiter::Restart(reply));
                self.check_waiters();
            }
            Err(ProcwatchError::NoProcess(_)) => {
                let _ = reply.send(self.relaunch_now());
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn relaunch_now(&mut self) -> Result<u32> {
        if self.control.pid().is_some() {
            if let Err(e) = self.control.release() {
                debug!(process = %self.name(), "Release before restart failed: {}", e);
            }
        }
        // A queued automatic relaunch would start a second instance
        self.watchdog.take_restart();

        self.launch()
    }

    /// Current reading: Terminated when the probe fails, else the status source's
    fn observe(&mut self) -> ProcessStatus {
        let pid = match self.control.pid() {
            Some(pid) if liveness::is_alive(&self.control) => pid,
            _ => return ProcessStatus::Terminated,
        };

        match self.status.read_status(pid) {
            Ok(status) => status,
            Err(e) => {
                warn!(process = %self.name(), pid, "{}", e);
                ProcessStatus::Unavailable
            }
        }
    }

    fn on_tick(&mut self) {
        let observed = self.observe();
        let outcome = match self.watchdog.step(WatchEvent::Tick(observed)) {
            Transition::Observed(outcome) => outcome,
            Transition::Stopped => return,
        };

        if let Some(status) = outcome.notify {
            debug!(process = %self.name(), %status, "Process status changed");
            self.send_notification(status);
        }

        if observed == ProcessStatus::Terminated {
            self.on_terminated();
        }

        match outcome.restart {
            RestartDecision::Relaunch => info!(
                process = %self.name(),
                remaining = %self.watchdog.budget(),
                "Process terminated, restart scheduled"
            ),
            RestartDecision::Coalesced => {
                debug!(process = %self.name(), "Restart already pending")
            }
            RestartDecision::Exhausted => info!(
                process = %self.name(),
                "No more attempts to restart process"
            ),
            RestartDecision::Skip => {}
        }

        if outcome.reap {
            self.reap_zombie();
        }
    }

    /// Drop the handle of a process the probe reported gone
    fn on_terminated(&mut self) {
        if self.control.pid().is_none() {
            return;
        }

        let exit = match self.control.try_wait() {
            Ok(Some(status)) => Ok(status),
            Ok(None) => Err("process vanished without an exit status".to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = self.control.release() {
            warn!(process = %self.name(), "Failed to release terminated process: {}", e);
        }
        self.start_time = None;
        self.resolve_waiters(exit);
    }

    fn reap_zombie(&mut self) {
        let pid = self.control.pid();
        debug!(process = %self.name(), ?pid, "Reaping zombie process");

        match self.control.try_wait() {
            Ok(Some(status)) => {
                debug!(process = %self.name(), ?pid, %status, "Zombie process reaped");
                self.resolve_waiters(Ok(status));
            }
            Ok(None) => warn!(process = %self.name(), ?pid, "Zombie process not collected yet"),
            Err(e) => warn!(process = %self.name(), ?pid, "Failed to reap dead process: {}", e),
        }
    }

    fn send_notification(&mut self, status: ProcessStatus) {
        let Some(sink) = &self.notify else {
            return;
        };

        match sink.try_send(status) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(
                process = %self.spec.name,
                %status,
                "Notification sink full, dropping status change"
            ),
            Err(TrySendError::Closed(_)) => {
                debug!(process = %self.spec.name, "Notification receiver dropped");
                self.notify = None;
            }
        }
    }

    /// Run the relaunch the watchdog queued
    fn relaunch(&mut self) {
        if !self.watchdog.take_restart() {
            return;
        }

        match self.launch() {
            Ok(pid) => info!(process = %self.name(), pid, "Process restarted"),
            Err(e) => error!(process = %self.name(), "Attempt to restart process failed: {}", e),
        }
    }

    fn check_waiters(&mut self) {
        if self.waiters.is_empty() {
            return;
        }

        match self.control.try_wait() {
            Ok(Some(status)) => self.resolve_waiters(Ok(status)),
            Ok(None) => {}
            Err(e) => self.resolve_waiters(Err(e.to_string())),
        }
    }

    /// Settle every parked caller once the exit of the current instance is known
    fn resolve_waiters(&mut self, exit: std::result::Result<ExitStatus, String>) {
        if self.waiters.is_empty() {
            return;
        }

        // No exit status, but nothing left to stop either
        let gone = exit.is_ok() || !liveness::is_alive(&self.control);
        let failure = |name: &str, exit: &std::result::Result<ExitStatus, String>| {
            let reason = exit.as_ref().err().map(String::as_str).unwrap_or_default();
            ProcwatchError::Wait(format!("{}: {}", name, reason))
        };
        let name = self.spec.name.clone();
        let mut delete = None;
        let mut restart = None;

        for waiter in std::mem::take(&mut self.waiters) {
            match waiter {
                ExitWaiter::Wait(reply) => {
                    let _ = reply.send(exit.clone().map_err(|_| failure(&name, &exit)));
                }
                ExitWaiter::Delete(reply) => delete = Some(reply),
                ExitWaiter::Restart(reply) => restart = Some(reply),
            }
        }

        if let Some(reply) = delete {
            if let Some(restart) = restart {
                let _ = restart.send(Err(self.gone()));
            }
            let result = if gone { Ok(()) } else { Err(failure(&name, &exit)) };
            self.finish_delete(reply, result);
            return;
        }

        if let Some(reply) = restart {
            let result = if gone {
                self.relaunch_now()
            } else {
                Err(failure(&name, &exit))
            };
            let _ = reply.send(result);
        }
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Pid(reply) => {
                let _ = reply.send(self.control.pid());
            }
            Request::StartTime(reply) => {
                let _ = reply.send(self.start_time);
            }
            Request::Status(reply) => {
                let _ = reply.send(self.observe());
            }
            Request::IsAlive(reply) => {
                let _ = reply.send(liveness::is_alive(&self.control));
            }
            Request::RestartsRemaining(reply) => {
                let _ = reply.send(self.watchdog.budget());
            }
            Request::Stop(reply) => {
                let _ = reply.send(self.stop_graceful());
            }
            Request::Kill(reply) => {
                let _ = reply.send(self.stop_forced());
            }
            Request::Signal(signal, reply) => {
                let _ = reply.send(self.send_signal(signal));
            }
            Request::Restart(reply) => self.restart(reply),
            Request::Wait(reply) => {
                if self.control.pid().is_none() {
                    let _ = reply.send(Err(self.no_process()));
                } else {
                    self.waiters.push(ExitWaiter::Wait(reply));
                    self.check_waiters();
                }
            }
            Request::Delete(reply) => self.delete(Some(reply)),
        }
    }

    /// Every `ProcessHandle` has been dropped
    fn on_detached(&mut self) {
        self.detached = true;

        if self.spec.options.auto_terminate {
            info!(process = %self.name(), "All handles dropped, terminating process");
            self.delete(None);
        } else {
            debug!(process = %self.name(), "All handles dropped, watchdog keeps running");
        }
    }

    /// Watchdog loop: polls on a fixed interval, serves requests, and exits
    /// when the cancellation token fires.
    pub(crate) async fn run(mut self) {
        debug!(process = %self.name(), "Process watcher started");

        let period = self.spec.options.poll_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = std::future::ready(()), if self.watchdog.restart_pending() => self.relaunch(),
                request = self.requests.recv(), if !self.detached => match request {
                    Some(request) => self.handle(request),
                    None => self.on_detached(),
                },
                _ = time::sleep(EXIT_POLL_INTERVAL), if !self.waiters.is_empty() => {
                    self.check_waiters()
                }
                _ = ticker.tick() => self.on_tick(),
            }
        }

        self.watchdog.step(WatchEvent::Cancel);
        drop(ticker);
        if self.notify.take().is_some() {
            debug!(process = %self.name(), "Notification sink closed");
        }
        debug!(process = %self.name(), "Process watcher stopped");
    }
}
