//! In-memory note storage.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

use super::{NoteDocument, NoteInfo, NoteRepo};

/// Keeps notes in a process-local map. Used by tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryNoteRepo {
    notes: Mutex<BTreeMap<String, NoteDocument>>,
}

impl MemoryNoteRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, NoteDocument>> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NoteRepo for MemoryNoteRepo {
    fn list(&self) -> Result<Vec<NoteInfo>> {
        Ok(self.lock().values().map(NoteDocument::info).collect())
    }

    fn get(&self, id: &str) -> Result<NoteDocument> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("note {}", id)))
    }

    fn save(&self, note: &NoteDocument) -> Result<()> {
        self.lock().insert(note.id.clone(), note.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.lock().remove(id);
        Ok(())
    }
}
