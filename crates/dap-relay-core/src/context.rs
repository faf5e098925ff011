//! Where an adapter runs.

use std::{collections::HashMap, path::PathBuf};

/// Working directory and environment overrides for an adapter process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchContext {
    /// Becomes the adapter's current directory.
    pub working_dir: PathBuf,
    /// Added to (or replacing entries of) the inherited environment.
    pub env: HashMap<String, String>,
}

impl LaunchContext {
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self::with_env(working_dir, HashMap::new())
    }

    #[must_use]
    pub fn with_env(working_dir: impl Into<PathBuf>, env: HashMap<String, String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            env,
        }
    }

    /// Set one environment override.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }
}
