//! Adapter command lines.

use std::{ffi::OsStr, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ProcessError, shell::resolve_executable_path};

/// Command line parse error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Command line cannot be parsed: {0}")]
    InvalidCommandLine(String),
    #[error("Command line is empty after parsing")]
    EmptyCommand,
}

/// Program and arguments used to launch an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCommand {
    /// Executable name or path.
    pub command: String,
    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
}

impl AdapterCommand {
    /// Create a command from parts.
    #[must_use]
    pub fn new<S, I>(command: S, args: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a shell-style command line such as `python3 -m debugpy.adapter`.
    ///
    /// # Errors
    /// Returns error if the line has unbalanced quotes or no program.
    pub fn parse(line: &str) -> Result<Self, CommandBuildError> {
        let mut parts = split_command_line(line)?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        let command = parts.remove(0);
        Ok(Self {
            command,
            args: parts,
        })
    }

    /// Append arguments.
    #[must_use]
    pub fn extend_args<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(more.into_iter().map(Into::into));
        self
    }

    /// Resolve the program against `working_dir` and `search_path`.
    ///
    /// # Errors
    /// Returns `ExecutableNotFound` if no candidate exists.
    pub async fn into_resolved(
        self,
        working_dir: &Path,
        search_path: Option<&OsStr>,
    ) -> Result<ResolvedCommand, ProcessError> {
        let Self { command, args } = self;
        let program = resolve_executable_path(&command, working_dir, search_path)
            .await
            .ok_or(ProcessError::ExecutableNotFound(command))?;
        Ok(ResolvedCommand { program, args })
    }
}

/// Command whose program has been located on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: std::path::PathBuf,
    pub args: Vec<String>,
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        Ok(winsplit::split(input))
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidCommandLine(input.to_string()))
    }
}
