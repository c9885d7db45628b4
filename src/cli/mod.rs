// CLI module - run a single supervised process from the command line

mod output;

use crate::config::ProcessConfig;
use crate::error::{ProcwatchError, Result};
use crate::process::{OutputTarget, ProcessHandle, RestartBudget};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time;
use tracing_subscriber::EnvFilter;

/// Grace period between SIGTERM and SIGKILL on shutdown
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// procwatch - launch a process and keep it alive
#[derive(Parser)]
#[command(name = "procwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a process and supervise it until interrupted
    Run {
        /// Name for the process (defaults to the command's file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Load the process from a TOML or JSON file instead of the command line
        #[arg(short, long, conflicts_with = "command")]
        config: Option<PathBuf>,

        /// Run the child in its own process group
        #[arg(short, long)]
        detach: bool,

        /// Automatic restarts: 0 never, N up to N times, -1 forever
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        restarts: i64,

        /// Polling interval in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,

        /// Forward the child's stdout/stderr to this terminal
        #[arg(long)]
        inherit_output: bool,

        /// Environment variables (KEY=VALUE format)
        #[arg(short, long)]
        env: Vec<String>,

        /// Command and its arguments
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Validate a configuration file and list the processes it defines
    Check {
        /// Path to a TOML or JSON configuration file
        config: PathBuf,
    },
}

impl Cli {
    /// Parse arguments, set up logging and run the command
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.init_tracing();
        cli.execute().await
    }

    fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("procwatch={}", self.log_level)));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Check { config } => {
                let configs = ProcessConfig::from_file(config)?;
                output::print_configs(&configs);
                Ok(())
            }
            Commands::Run { .. } => {
                let config = self.build_config()?;
                supervise(config).await
            }
        }
    }

    /// Build the process configuration from the `run` arguments
    fn build_config(&self) -> Result<ProcessConfig> {
        let Commands::Run {
            name,
            config,
            detach,
            restarts,
            interval_ms,
            inherit_output,
            env,
            command,
        } = &self.command
        else {
            return Err(ProcwatchError::ConfigError(
                "not a run command".to_string(),
            ));
        };

        if let Some(path) = config {
            let configs = ProcessConfig::from_file(path)?;
            return match name {
                Some(name) => configs
                    .into_iter()
                    .find(|c| &c.name == name)
                    .ok_or_else(|| {
                        ProcwatchError::ConfigError(format!(
                            "No process named '{}' in {}",
                            name,
                            path.display()
                        ))
                    }),
                None => configs.into_iter().next().ok_or_else(|| {
                    ProcwatchError::InvalidConfig("No process configuration found".to_string())
                }),
            };
        }

        let (program, args) = command
            .split_first()
            .ok_or_else(|| ProcwatchError::MissingConfigField("command".to_string()))?;

        let program = PathBuf::from(program);
        let name = name.clone().unwrap_or_else(|| {
            program
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| program.display().to_string())
        });

        let mut config = ProcessConfig::new(name, program);
        config.args = args.to_vec();
        config.env = parse_env_vars(env)?;
        config.detach = *detach;
        config.restarts = RestartBudget::from_count(*restarts)?;
        config.poll_interval_ms = *interval_ms;
        if *inherit_output {
            config.stdout = OutputTarget::Inherit;
            config.stderr = OutputTarget::Inherit;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Launch the process, print every status change, delete it on SIGINT/SIGTERM
async fn supervise(config: ProcessConfig) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(32);
    let mut spec = config.into_spec();
    spec.options.notify = Some(tx);

    let handle = ProcessHandle::launch(spec)?;
    output::print_started(&handle).await;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut outcome: Option<Result<()>> = None;

    loop {
        tokio::select! {
            status = rx.recv() => match status {
                Some(status) => output::print_status(handle.name(), status),
                // Sink closes when the watchdog exits
                None => break,
            },
            _ = sigterm.recv(), if outcome.is_none() => {
                outcome = Some(shutdown(&handle, "SIGTERM").await);
            }
            _ = sigint.recv(), if outcome.is_none() => {
                outcome = Some(shutdown(&handle, "SIGINT").await);
            }
        }
    }

    outcome.unwrap_or(Ok(()))
}

async fn shutdown(handle: &ProcessHandle, signal_name: &str) -> Result<()> {
    tracing::info!("Received {}, stopping {}", signal_name, handle.name());

    let result = match time::timeout(STOP_TIMEOUT, handle.delete()).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                "{} did not exit within {:?}, sending SIGKILL",
                handle.name(),
                STOP_TIMEOUT
            );
            handle.kill().await
        }
    };

    match result {
        Ok(()) => {
            output::print_deleted(handle.name());
            Ok(())
        }
        Err(e) => {
            output::print_error(&e.to_string());
            // Make sure the sink closes so the loop above ends
            handle.cancel();
            Err(e)
        }
    }
}

/// Parse environment variables from KEY=VALUE format
fn parse_env_vars(env_vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for env_str in env_vars {
        if let Some((key, value)) = env_str.split_once('=') {
            map.insert(key.to_string(), value.to_string());
        } else {
            return Err(ProcwatchError::ConfigError(format!(
                "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                env_str
            )));
        }
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessSpec;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_env_vars() {
        let env_vars = vec!["NODE_ENV=production".to_string(), "PORT=3000".to_string()];
        let result = parse_env_vars(&env_vars).unwrap();
        assert_eq!(result.get("NODE_ENV"), Some(&"production".to_string()));
        assert_eq!(result.get("PORT"), Some(&"3000".to_string()));
    }

    #[test]
    fn test_parse_env_vars_invalid() {
        let env_vars = vec!["INVALID".to_string()];
        let result = parse_env_vars(&env_vars);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_config_from_args() {
        let cli = parse(&[
            "procwatch",
            "run",
            "--detach",
            "--restarts",
            "-1",
            "--interval-ms",
            "250",
            "-e",
            "MODE=test",
            "--",
            "/bin/sleep",
            "30",
        ]);

        let config = cli.build_config().unwrap();
        assert_eq!(config.name, "sleep");
        assert_eq!(config.command, PathBuf::from("/bin/sleep"));
        assert_eq!(config.args, vec!["30".to_string()]);
        assert!(config.detach);
        assert_eq!(config.restarts, RestartBudget::Infinite);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.env.get("MODE"), Some(&"test".to_string()));
        assert_eq!(config.stdout, OutputTarget::Null);
    }

    #[test]
    fn test_build_config_requires_command() {
        let cli = parse(&["procwatch", "run", "--name", "empty"]);
        assert!(matches!(
            cli.build_config(),
            Err(ProcwatchError::MissingConfigField(_))
        ));
    }

    #[test]
    fn test_build_config_rejects_bad_budget() {
        let cli = parse(&["procwatch", "run", "--restarts", "-3", "--", "/bin/true"]);
        assert!(matches!(
            cli.build_config(),
            Err(ProcwatchError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_build_config_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("procwatch.toml");
        std::fs::write(
            &path,
            r#"
            [[processes]]
            name = "first"
            command = "/bin/true"

            [[processes]]
            name = "second"
            command = "/bin/sleep"
            args = ["1"]
            restarts = 2
        "#,
        )
        .unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let config = parse(&["procwatch", "run", "--config", &path_str])
            .build_config()
            .unwrap();
        assert_eq!(config.name, "first");

        let config = parse(&["procwatch", "run", "--config", &path_str, "--name", "second"])
            .build_config()
            .unwrap();
        assert_eq!(config.restarts, RestartBudget::Limited(2));

        let result = parse(&["procwatch", "run", "--config", &path_str, "--name", "third"])
            .build_config();
        assert!(matches!(result, Err(ProcwatchError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_process() {
        let handle = ProcessHandle::launch(ProcessSpec::new("cli-sleep", "/bin/sleep", ["30"]))
            .unwrap();

        shutdown(&handle, "SIGTERM").await.unwrap();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_reports_delete_failure() {
        let handle = ProcessHandle::launch(ProcessSpec::new("cli-gone", "/bin/sleep", ["30"]))
            .unwrap();
        handle.kill().await.unwrap();

        let result = shutdown(&handle, "SIGINT").await;
        assert!(matches!(result, Err(ProcwatchError::DeleteFailed { .. })));
        assert!(handle.is_cancelled());
    }
}
