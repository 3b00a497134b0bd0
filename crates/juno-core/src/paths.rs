//! Juno home directory management.
//!
//! Provides a consistent directory structure so the CLI and any embedding
//! service resolve the same paths.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory structure under the Juno home.
///
/// ```text
/// ~/.juno/
/// └── notebook/   # One directory per note (note.json)
/// ```
///
/// The notebook directory may live elsewhere when configured explicitly.
#[derive(Debug, Clone)]
pub struct JunoDirs {
    /// The home directory itself.
    pub home: PathBuf,

    /// Note storage root.
    pub notebook_dir: PathBuf,
}

impl JunoDirs {
    /// Default layout under `home`.
    ///
    /// Creates all necessary directories if they don't exist.
    pub fn from_home(home: &Path) -> Result<Self> {
        Self::create(home.to_path_buf(), home.join("notebook"))
    }

    /// Layout with an explicit notebook directory.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn create(home: PathBuf, notebook_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&home)?;
        fs::create_dir_all(&notebook_dir)?;
        Ok(Self { home, notebook_dir })
    }

    /// `~/.juno`, or `.juno` in the working directory when there is no home.
    pub fn default_home() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".juno"))
            .unwrap_or_else(|| PathBuf::from(".juno"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_home() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let home = temp.path().join(".juno");

        let dirs = JunoDirs::from_home(&home).expect("Failed to create dirs");

        assert_eq!(dirs.home, home);
        assert!(dirs.notebook_dir.ends_with("notebook"));
        assert!(dirs.notebook_dir.exists());
    }

    #[test]
    fn test_explicit_notebook_dir() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = JunoDirs::create(temp.path().join("home"), temp.path().join("notes"))
            .expect("Failed to create dirs");

        assert!(dirs.home.exists());
        assert!(dirs.notebook_dir.ends_with("notes"));
        assert!(dirs.notebook_dir.exists());
    }

    #[test]
    fn test_default_home_name() {
        assert!(JunoDirs::default_home().ends_with(".juno"));
    }
}
