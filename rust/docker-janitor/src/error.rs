use thiserror::Error;

use crate::config::ConfigurationError;
use crate::ownership::OracleError;
use crate::runtime::RuntimeError;
use crate::scheduler::LauncherError;

/// Top-level error for wiring and running the janitor.
#[derive(Error, Debug)]
pub enum JanitorError {
    /// Configuration rejected by the validator
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Task registration failed
    #[error("Scheduling failed: {0}")]
    Launcher(#[from] LauncherError),

    /// Container runtime errors
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Ownership oracle errors
    #[error("Ownership oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for janitor operations
pub type JanitorResult<T> = Result<T, JanitorError>;
