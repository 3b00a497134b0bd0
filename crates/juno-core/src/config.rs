//! Notebook configuration.

use std::path::PathBuf;

use crate::error::Result;
use crate::paths::JunoDirs;

pub const ENV_HOME: &str = "JUNO_HOME";
pub const ENV_NOTEBOOK_DIR: &str = "JUNO_NOTEBOOK_DIR";
pub const ENV_RELOAD_FROM_STORAGE: &str = "JUNO_NOTEBOOK_RELOAD_FROM_STORAGE";
pub const ENV_INTERPRETERS: &str = "JUNO_INTERPRETERS";

const DEFAULT_INTERPRETERS: &str = "echo,sh";

/// Settings for building a [`Notebook`](crate::Notebook).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookConfig {
    pub home: PathBuf,
    pub notebook_dir: PathBuf,
    /// Re-sync with storage on every `get_all_notes`.
    pub reload_from_storage: bool,
    /// Interpreter backend keys, in binding order.
    pub interpreters: Vec<String>,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        let home = JunoDirs::default_home();
        Self {
            notebook_dir: home.join("notebook"),
            home,
            reload_from_storage: false,
            interpreters: split_list(DEFAULT_INTERPRETERS),
        }
    }
}

impl NotebookConfig {
    /// Read configuration from `JUNO_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let home = lookup(ENV_HOME).map(PathBuf::from).unwrap_or(defaults.home);
        let notebook_dir = lookup(ENV_NOTEBOOK_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("notebook"));
        let reload_from_storage = lookup(ENV_RELOAD_FROM_STORAGE)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        let interpreters = lookup(ENV_INTERPRETERS)
            .map(|value| split_list(&value))
            .filter(|keys| !keys.is_empty())
            .unwrap_or(defaults.interpreters);

        Self {
            home,
            notebook_dir,
            reload_from_storage,
            interpreters,
        }
    }

    pub fn with_notebook_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.notebook_dir = dir.into();
        self
    }

    /// Create the directory layout.
    pub fn ensure_dirs(&self) -> Result<JunoDirs> {
        JunoDirs::create(self.home.clone(), self.notebook_dir.clone())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}
