// Output formatting and display for CLI

use crate::config::ProcessConfig;
use crate::process::{ProcessHandle, ProcessStatus};
use chrono::{DateTime, Local, Utc};
use colored::*;

/// Print launch details of a freshly started process
pub async fn print_started(handle: &ProcessHandle) {
    println!("{}", "✓ Process started".green().bold());
    println!("  {}: {}", "Name".bold(), handle.name().cyan());
    println!("  {}: {}", "Command".bold(), handle.command().display());

    if let Ok(Some(pid)) = handle.pid().await {
        println!("  {}: {}", "PID".bold(), pid);
    }
    if let Ok(Some(started)) = handle.start_time().await {
        println!("  {}: {}", "Started".bold(), format_time(started));
    }
}

/// Print one status change notification
pub fn print_status(name: &str, status: ProcessStatus) {
    let now = Local::now().format("%H:%M:%S");
    println!("[{}] {} {}", now, name.cyan(), colorize_status(status));
}

pub fn print_deleted(name: &str) {
    println!(
        "{}",
        format!("✓ Process {} deleted successfully", name)
            .green()
            .bold()
    );
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print the processes defined in a configuration file
pub fn print_configs(configs: &[ProcessConfig]) {
    println!(
        "{}",
        format!("✓ {} process(es) configured", configs.len())
            .green()
            .bold()
    );

    for config in configs {
        println!(
            "  {} {} {} (restarts: {}, interval: {}ms{})",
            config.name.cyan(),
            config.command.display(),
            config.args.join(" "),
            config.restarts,
            config.poll_interval_ms,
            if config.detach { ", detached" } else { "" }
        );
    }
}

fn colorize_status(status: ProcessStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        ProcessStatus::Running | ProcessStatus::Sleeping | ProcessStatus::Idle => text.green(),
        ProcessStatus::DiskSleep | ProcessStatus::Stopped | ProcessStatus::Tracing => {
            text.yellow()
        }
        ProcessStatus::Zombie | ProcessStatus::Dead | ProcessStatus::Terminated => text.red(),
        ProcessStatus::Unavailable => text.dimmed(),
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
