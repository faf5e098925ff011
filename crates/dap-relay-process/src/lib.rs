//! Debug adapter process supervision.
//!
//! Provides:
//! - `AdapterProcess` - Spawn, wire, and stop an adapter subprocess
//! - `AdapterCommand` - Adapter command lines and executable resolution

pub mod command;
pub mod shell;
pub mod supervisor;

pub use command::{AdapterCommand, CommandBuildError, ResolvedCommand};
pub use shell::resolve_executable_path;
pub use supervisor::{AdapterProcess, AdapterStdin, ExitWatcher};

/// Process error.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Adapter process has no {0} pipe")]
    MissingPipe(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
