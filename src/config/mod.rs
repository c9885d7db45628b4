use crate::error::{ProcwatchError, Result};
use crate::process::{OutputTarget, ProcessOptions, ProcessSpec, RestartBudget};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration of one supervised process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Process name (diagnostics only)
    pub name: String,

    /// Path to the executable
    pub command: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables on top of the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory (defaults to the current directory)
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Run in a separate process group
    #[serde(default)]
    pub detach: bool,

    /// Automatic restarts: 0 never, N up to N times, -1 forever
    #[serde(default)]
    pub restarts: RestartBudget,

    /// Watchdog polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub stdout: OutputTarget,

    #[serde(default)]
    pub stderr: OutputTarget,

    /// Delete the process when the last handle is dropped
    #[serde(default)]
    pub auto_terminate: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Substitute `$VAR` and `${VAR}` from the host environment.
/// References to unset variables are left as written.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = match after.strip_prefix('{') {
            Some(braced) => match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            },
            None => {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            }
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => {
                out.push_str(&value);
                rest = &after[consumed..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

impl ProcessConfig {
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            detach: false,
            restarts: RestartBudget::Never,
            poll_interval_ms: default_poll_interval_ms(),
            stdout: OutputTarget::Null,
            stderr: OutputTarget::Null,
            auto_terminate: false,
        }
    }

    /// Load process configurations from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Vec<ProcessConfig>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProcwatchError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let configs = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(ProcwatchError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        let configs: Vec<ProcessConfig> = configs
            .into_iter()
            .map(|mut config| {
                config.expand_env_vars();
                config
            })
            .collect();

        for config in &configs {
            config.validate()?;
        }

        Ok(configs)
    }

    /// A file holds either one process at the top level or a `processes` list
    fn parse_toml(contents: &str) -> Result<Vec<ProcessConfig>> {
        let mut table: toml::Table = toml::from_str(contents)
            .map_err(|e| ProcwatchError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        let configs = match table.remove("processes") {
            Some(processes) => processes.try_into::<Vec<ProcessConfig>>(),
            None => toml::Value::Table(table)
                .try_into::<ProcessConfig>()
                .map(|config| vec![config]),
        }
        .map_err(|e| ProcwatchError::InvalidConfig(format!("Invalid process entry: {}", e)))?;

        Self::non_empty(configs)
    }

    fn parse_json(contents: &str) -> Result<Vec<ProcessConfig>> {
        let mut value: serde_json::Value = serde_json::from_str(contents)
            .map_err(|e| ProcwatchError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;

        let configs = match value.get_mut("processes").map(serde_json::Value::take) {
            Some(processes) => serde_json::from_value::<Vec<ProcessConfig>>(processes),
            None => serde_json::from_value::<ProcessConfig>(value).map(|config| vec![config]),
        }
        .map_err(|e| ProcwatchError::InvalidConfig(format!("Invalid process entry: {}", e)))?;

        Self::non_empty(configs)
    }

    fn non_empty(configs: Vec<ProcessConfig>) -> Result<Vec<ProcessConfig>> {
        if configs.is_empty() {
            return Err(ProcwatchError::InvalidConfig(
                "No process configuration found in file".to_string(),
            ));
        }
        Ok(configs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ProcwatchError::MissingConfigField("name".to_string()));
        }

        if self.command.as_os_str().is_empty() {
            return Err(ProcwatchError::MissingConfigField("command".to_string()));
        }

        if self.poll_interval_ms == 0 {
            return Err(ProcwatchError::ConfigValidationError(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(ProcwatchError::ConfigValidationError(format!(
                    "Working directory does not exist or is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    fn expand_env_vars(&mut self) {
        self.command = PathBuf::from(expand_env(&self.command.to_string_lossy()));
        self.cwd = self
            .cwd
            .take()
            .map(|cwd| PathBuf::from(expand_env(&cwd.to_string_lossy())));

        for arg in &mut self.args {
            *arg = expand_env(arg);
        }
        for value in self.env.values_mut() {
            *value = expand_env(value);
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Runtime spec for this process. The notification sink is attached by the caller.
    pub fn into_spec(self) -> ProcessSpec {
        let mut options = ProcessOptions::default()
            .detach(self.detach)
            .restarts(self.restarts)
            .poll_interval(self.poll_interval())
            .output(self.stdout, self.stderr)
            .auto_terminate(self.auto_terminate);

        let mut env: Vec<(String, String)> = self.env.into_iter().collect();
        env.sort();
        options.env = env;
        options.cwd = self.cwd;

        ProcessSpec::new(self.name, self.command, self.args).with_options(options)
    }
}
