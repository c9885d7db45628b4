use crate::error::{ProcwatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default watchdog polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Integer form of the "restart forever" budget
pub const INFINITE_RESTARTS: i64 = -1;

/// Coarse run state of a supervised process as observed by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    Tracing,
    Idle,
    Zombie,
    Dead,
    /// The liveness probe reported the process gone
    Terminated,
    /// Fallback for an empty or unrecognized status reading
    #[default]
    Unavailable,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Sleeping => write!(f, "sleeping"),
            ProcessStatus::DiskSleep => write!(f, "disk sleep"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Tracing => write!(f, "tracing stop"),
            ProcessStatus::Idle => write!(f, "idle"),
            ProcessStatus::Zombie => write!(f, "zombie"),
            ProcessStatus::Dead => write!(f, "dead"),
            ProcessStatus::Terminated => write!(f, "terminated"),
            ProcessStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// How many automatic relaunches the watchdog may still perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum RestartBudget {
    #[default]
    Never,
    Limited(u32),
    Infinite,
}

impl RestartBudget {
    /// Build a budget from its integer form: `0` never, `N > 0` up to N times, `-1` forever
    pub fn from_count(count: i64) -> Result<Self> {
        match count {
            INFINITE_RESTARTS => Ok(RestartBudget::Infinite),
            0 => Ok(RestartBudget::Never),
            n if n > 0 => u32::try_from(n).map(RestartBudget::Limited).map_err(|_| {
                ProcwatchError::ConfigValidationError(format!("restart budget too large: {}", n))
            }),
            n => Err(ProcwatchError::ConfigValidationError(format!(
                "restart budget must be -1, 0 or positive, got {}",
                n
            ))),
        }
    }

    pub fn as_count(&self) -> i64 {
        match self {
            RestartBudget::Never => 0,
            RestartBudget::Limited(n) => i64::from(*n),
            RestartBudget::Infinite => INFINITE_RESTARTS,
        }
    }

    /// Take one restart out of the budget. Returns false (and leaves the
    /// budget untouched) when it is exhausted.
    pub fn consume(&mut self) -> bool {
        match *self {
            RestartBudget::Infinite => true,
            RestartBudget::Limited(n) if n > 1 => {
                *self = RestartBudget::Limited(n - 1);
                true
            }
            RestartBudget::Limited(1) => {
                *self = RestartBudget::Never;
                true
            }
            _ => false,
        }
    }
}

impl TryFrom<i64> for RestartBudget {
    type Error = ProcwatchError;

    fn try_from(count: i64) -> Result<Self> {
        RestartBudget::from_count(count)
    }
}

impl From<RestartBudget> for i64 {
    fn from(budget: RestartBudget) -> Self {
        budget.as_count()
    }
}

impl std::fmt::Display for RestartBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartBudget::Never => write!(f, "none"),
            RestartBudget::Limited(n) => write!(f, "{}", n),
            RestartBudget::Infinite => write!(f, "unlimited"),
        }
    }
}

/// Where a child's stdout or stderr goes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTarget {
    /// Discarded; daemonized children stay out of the host's output
    #[default]
    Null,
    Inherit,
    /// Appended to a file
    File(PathBuf),
}

/// Runtime options of a supervised process
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Run in a new process group, detached from the host's
    pub detach: bool,
    pub restart_budget: RestartBudget,
    /// Sink for status change notifications, closed when the watchdog exits
    pub notify: Option<mpsc::Sender<ProcessStatus>>,
    pub poll_interval: Duration,
    /// Extra variables layered on the inherited environment
    pub env: Vec<(String, String)>,
    /// Working directory; the host's current directory when unset
    pub cwd: Option<PathBuf>,
    pub stdout: OutputTarget,
    pub stderr: OutputTarget,
    /// Delete the process once every handle to it has been dropped
    pub auto_terminate: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            detach: false,
            restart_budget: RestartBudget::Never,
            notify: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            env: Vec::new(),
            cwd: None,
            stdout: OutputTarget::Null,
            stderr: OutputTarget::Null,
            auto_terminate: false,
        }
    }
}

impl ProcessOptions {
    pub fn detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    pub fn restarts(mut self, budget: RestartBudget) -> Self {
        self.restart_budget = budget;
        self
    }

    pub fn notify(mut self, sink: mpsc::Sender<ProcessStatus>) -> Self {
        self.notify = Some(sink);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn output(mut self, stdout: OutputTarget, stderr: OutputTarget) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn auto_terminate(mut self, auto_terminate: bool) -> Self {
        self.auto_terminate = auto_terminate;
        self
    }
}

/// Everything needed to launch and supervise one process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Diagnostic name, unique within the host application
    pub name: String,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub options: ProcessOptions,
}

impl ProcessSpec {
    pub fn new<I, S>(name: impl Into<String>, command: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            options: ProcessOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProcessOptions) -> Self {
        self.options = options;
        self
    }

    /// Command name for diagnostics
    pub fn command_name(&self) -> String {
        self.command.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Running.to_string(), "running");
        assert_eq!(ProcessStatus::Terminated.to_string(), "terminated");
        assert_eq!(ProcessStatus::default(), ProcessStatus::Unavailable);
    }

    #[test]
    fn test_budget_from_count() {
        assert_eq!(RestartBudget::from_count(0).unwrap(), RestartBudget::Never);
        assert_eq!(RestartBudget::from_count(3).unwrap(), RestartBudget::Limited(3));
        assert_eq!(RestartBudget::from_count(-1).unwrap(), RestartBudget::Infinite);
        assert!(matches!(
            RestartBudget::from_count(-2),
            Err(ProcwatchError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_budget_consume_limited() {
        let mut budget = RestartBudget::Limited(2);
        assert!(budget.consume());
        assert_eq!(budget, RestartBudget::Limited(1));
        assert!(budget.consume());
        assert_eq!(budget, RestartBudget::Never);
        assert!(!budget.consume());
        assert_eq!(budget.as_count(), 0);
    }

    #[test]
    fn test_budget_consume_infinite() {
        let mut budget = RestartBudget::Infinite;
        for _ in 0..100 {
            assert!(budget.consume());
        }
        assert_eq!(budget, RestartBudget::Infinite);
        assert_eq!(budget.as_count(), -1);
    }

    #[test]
    fn test_budget_serde_integer_form() {
        #[derive(Deserialize)]
        struct Wrapper {
            restarts: RestartBudget,
        }

        let w: Wrapper = serde_json::from_str(r#"{"restarts": -1}"#).unwrap();
        assert_eq!(w.restarts, RestartBudget::Infinite);
        let w: Wrapper = serde_json::from_str(r#"{"restarts": 4}"#).unwrap();
        assert_eq!(w.restarts, RestartBudget::Limited(4));
        assert!(serde_json::from_str::<Wrapper>(r#"{"restarts": -7}"#).is_err());
    }

    #[test]
    fn test_output_target_serde() {
        let target: OutputTarget = serde_json::from_str(r#""inherit""#).unwrap();
        assert_eq!(target, OutputTarget::Inherit);
        let target: OutputTarget = serde_json::from_str(r#"{"file": "/tmp/out.log"}"#).unwrap();
        assert_eq!(target, OutputTarget::File(PathBuf::from("/tmp/out.log")));
    }

    #[test]
    fn test_spec_builder() {
        let spec = ProcessSpec::new("sleeper", "/bin/sleep", ["10"]).with_options(
            ProcessOptions::default()
                .detach(true)
                .restarts(RestartBudget::Limited(2))
                .env("KEY", "value"),
        );
        assert_eq!(spec.args, vec!["10".to_string()]);
        assert!(spec.options.detach);
        assert_eq!(spec.options.restart_budget, RestartBudget::Limited(2));
        assert_eq!(spec.options.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(spec.command_name(), "/bin/sleep");
    }
}
