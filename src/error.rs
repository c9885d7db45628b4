use thiserror::Error;

/// Main error type for the procwatch supervisor
#[derive(Debug, Error)]
pub enum ProcwatchError {
    // Lifecycle errors
    #[error("Failed to resolve working directory: {0}")]
    Environment(String),

    #[error("Failed to start process (cmd: {command}): {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No running process instance for {0}")]
    NoProcess(String),

    #[error("Signal delivery failed: {0}")]
    Signal(String),

    #[error("Resource release failed: {0}")]
    Release(String),

    #[error("Failed while waiting on process {0}")]
    Wait(String),

    #[error("Failed to read process status: {0}")]
    StatusRead(String),

    #[error("Failed to delete process {name}: graceful stop: {graceful}; forced stop: {forced}")]
    DeleteFailed {
        name: String,
        graceful: Box<ProcwatchError>,
        forced: Box<ProcwatchError>,
    },

    #[error("A restart or delete of process {0} is already in progress")]
    Busy(String),

    #[error("Watchdog for process {0} is no longer running")]
    SupervisorGone(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for procwatch operations
pub type Result<T> = std::result::Result<T, ProcwatchError>;
