use crate::process::types::{OutputTarget, ProcessSpec};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Low-level control over one OS process.
///
/// Everything platform specific (creation, signaling, reaping, releasing the
/// handle) sits behind this trait so the supervisor can be driven by a
/// replacement implementation.
pub trait ProcessControl: Send + 'static {
    /// Create the OS process and return its PID
    fn start(&mut self, spec: &ProcessSpec, cwd: &Path) -> io::Result<u32>;

    /// PID of the process currently held, `None` when nothing is held
    fn pid(&self) -> Option<u32>;

    /// Deliver `signal` to the process; `None` sends no signal and only
    /// checks that the process can be signaled.
    fn signal(&self, signal: Option<Signal>) -> nix::Result<()>;

    /// Collect the exit status if the process has exited, without blocking
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Drop the OS handle. The process is not signaled.
    fn release(&mut self) -> io::Result<()>;
}

/// `ProcessControl` backed by `tokio::process`
#[derive(Debug, Default)]
pub struct OsProcess {
    child: Option<Child>,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
}

impl OsProcess {
    pub fn new() -> Self {
        Self::default()
    }

    fn stdio(target: &OutputTarget) -> io::Result<Stdio> {
        match target {
            OutputTarget::Null => Ok(Stdio::null()),
            OutputTarget::Inherit => Ok(Stdio::inherit()),
            OutputTarget::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(Stdio::from(file))
            }
        }
    }
}

impl ProcessControl for OsProcess {
    fn start(&mut self, spec: &ProcessSpec, cwd: &Path) -> io::Result<u32> {
        let options = &spec.options;
        let mut command = Command::new(&spec.command);

        // argv[0] is the executable path itself
        command.arg0(&spec.command);
        command.args(&spec.args);
        command.current_dir(cwd);
        command.envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        command.stdin(Stdio::inherit());
        command.stdout(Self::stdio(&options.stdout)?);
        command.stderr(Self::stdio(&options.stderr)?);

        if options.detach {
            command.process_group(0);
        }

        let child = command.spawn()?;
        let pid = child.id().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "spawned process has no PID")
        })?;

        self.child = Some(child);
        self.pid = Some(pid);
        self.exit = None;

        Ok(pid)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn signal(&self, signal: Option<Signal>) -> nix::Result<()> {
        let pid = match self.pid {
            Some(pid) => pid,
            None => return Err(Errno::ESRCH),
        };
        // Already reaped: the PID may belong to someone else by now
        if self.exit.is_some() {
            return Err(Errno::ESRCH);
        }
        let raw = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
        signal::kill(Pid::from_raw(raw), signal)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no child process held"))?;

        let status = child.try_wait()?;
        if status.is_some() {
            self.exit = status;
        }
        Ok(status)
    }

    fn release(&mut self) -> io::Result<()> {
        self.child = None;
        self.pid = None;
        self.exit = None;
        Ok(())
    }
}
