//! Filesystem note storage.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Error, Result};

use super::{NoteDocument, NoteInfo, NoteRepo};

const NOTE_FILE: &str = "note.json";
const LOCK_FILE: &str = ".lock";

/// Stores each note as `<dir>/<note id>/note.json`.
///
/// ```text
/// notebook/
/// ├── note_1700000000000_ab12cd34/
/// │   ├── .lock
/// │   └── note.json
/// └── ...
/// ```
#[derive(Debug, Clone)]
pub struct FsNoteRepo {
    dir: PathBuf,
}

impl FsNoteRepo {
    /// Open a repository rooted at `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn note_dir(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(Error::Storage(format!("invalid note id '{}'", id)));
        }
        Ok(self.dir.join(id))
    }

    /// Hold an exclusive lock on a note directory for the guard's lifetime.
    fn lock(note_dir: &Path) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(note_dir.join(LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn read(path: &Path, id: &str) -> Result<NoteDocument> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("note {}", id)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl NoteRepo for FsNoteRepo {
    fn list(&self) -> Result<Vec<NoteInfo>> {
        let mut notes = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path().join(NOTE_FILE);
            if !path.exists() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match Self::read(&path, &id) {
                Ok(doc) => notes.push(doc.info()),
                Err(e) => tracing::warn!("Skipping unreadable note {}: {}", path.display(), e),
            }
        }
        notes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(notes)
    }

    fn get(&self, id: &str) -> Result<NoteDocument> {
        let note_dir = self.note_dir(id)?;
        Self::read(&note_dir.join(NOTE_FILE), id)
    }

    fn save(&self, note: &NoteDocument) -> Result<()> {
        let note_dir = self.note_dir(&note.id)?;
        fs::create_dir_all(&note_dir)?;
        let lock = Self::lock(&note_dir)?;

        let json = serde_json::to_vec_pretty(note)?;
        let path = note_dir.join(NOTE_FILE);
        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;

        FileExt::unlock(&lock)?;
        tracing::debug!("Saved note {} ({} bytes)", note.id, json.len());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let note_dir = self.note_dir(id)?;
        if !note_dir.exists() {
            return Ok(());
        }
        let lock = Self::lock(&note_dir)?;
        fs::remove_dir_all(&note_dir)?;
        drop(lock);
        tracing::debug!("Removed note {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::NoteConfig;
    use tempfile::TempDir;

    fn doc(id: &str, name: &str) -> NoteDocument {
        NoteDocument {
            id: id.to_string(),
            name: name.to_string(),
            config: NoteConfig::default(),
            interpreters: Vec::new(),
            paragraphs: Vec::new(),
        }
    }

    #[test]
    fn test_save_get_list() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let repo = FsNoteRepo::new(temp.path().join("notebook")).unwrap();

        repo.save(&doc("b", "second")).unwrap();
        repo.save(&doc("a", "first")).unwrap();

        assert_eq!(repo.get("a").unwrap().name, "first");
        assert!(temp.path().join("notebook/a/note.json").exists());

        let ids: Vec<_> = repo.list().unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_save_overwrites() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let repo = FsNoteRepo::new(temp.path()).unwrap();

        repo.save(&doc("a", "old")).unwrap();
        repo.save(&doc("a", "new")).unwrap();

        assert_eq!(repo.get("a").unwrap().name, "new");
        assert!(!temp.path().join("a/note.tmp").exists());
    }

    #[test]
    fn test_missing_note() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let repo = FsNoteRepo::new(temp.path()).unwrap();

        assert!(matches!(repo.get("nope"), Err(Error::NotFound(_))));
        repo.remove("nope").unwrap();
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let repo = FsNoteRepo::new(temp.path()).unwrap();

        repo.save(&doc("a", "first")).unwrap();
        repo.remove("a").unwrap();

        assert!(repo.list().unwrap().is_empty());
        assert!(!temp.path().join("a").exists());
    }

    #[test]
    fn test_rejects_path_ids() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let repo = FsNoteRepo::new(temp.path()).unwrap();

        assert!(matches!(repo.get("../x"), Err(Error::Storage(_))));
        assert!(matches!(repo.save(&doc("..", "x")), Err(Error::Storage(_))));
    }

    #[test]
    fn test_list_skips_corrupt_notes() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let repo = FsNoteRepo::new(temp.path()).unwrap();

        repo.save(&doc("good", "ok")).unwrap();
        fs::create_dir_all(temp.path().join("bad")).unwrap();
        fs::write(temp.path().join("bad/note.json"), "{not json").unwrap();

        let ids: Vec<_> = repo.list().unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["good"]);
    }
}
