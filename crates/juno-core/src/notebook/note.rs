//! Note: an ordered list of paragraphs.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::interpreter::NoteInterpreterLoader;
use crate::repo::{NoteDocument, NoteRepo};
use crate::scheduler::{Job, JobListener};

use super::paragraph::Paragraph;

/// Per-note configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteConfig {
    /// Gates the cron trigger.
    #[serde(default)]
    pub enabled: bool,
    /// Cron expression (6 or 7 fields, seconds first).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NoteConfig {
    /// The cron expression, if the note is enabled and one is set.
    pub fn active_cron(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.cron
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}

/// Supplies the listener attached to every paragraph of a note.
pub trait JobListenerFactory: Send + Sync {
    fn paragraph_listener(&self, note_id: &str) -> Arc<dyn JobListener>;
}

/// A notebook document.
pub struct Note {
    id: String,
    name: RwLock<String>,
    config: RwLock<NoteConfig>,
    paragraphs: RwLock<Vec<Arc<Paragraph>>>,
    loader: Arc<NoteInterpreterLoader>,
    repo: Arc<dyn NoteRepo>,
    listener: Option<Arc<dyn JobListener>>,
    /// Set once the note is detached; held for reading across every submit.
    removed: RwLock<bool>,
}

impl Note {
    pub(crate) fn new(
        id: String,
        name: String,
        loader: Arc<NoteInterpreterLoader>,
        repo: Arc<dyn NoteRepo>,
        listener: Option<Arc<dyn JobListener>>,
    ) -> Self {
        Self {
            id,
            name: RwLock::new(name),
            config: RwLock::new(NoteConfig::default()),
            paragraphs: RwLock::new(Vec::new()),
            loader,
            repo,
            listener,
            removed: RwLock::new(false),
        }
    }

    pub(crate) fn from_document(
        doc: NoteDocument,
        loader: Arc<NoteInterpreterLoader>,
        repo: Arc<dyn NoteRepo>,
        listener: Option<Arc<dyn JobListener>>,
    ) -> Self {
        let note = Self::new(doc.id, doc.name, loader, repo, listener);
        note.set_config(doc.config);
        {
            let mut paragraphs = note.write_paragraphs();
            for paragraph_doc in doc.paragraphs {
                let paragraph = Paragraph::from_document(&note.id, note.loader.clone(), paragraph_doc);
                paragraphs.push(note.attach(paragraph));
            }
        }
        note
    }

    /// Deep copy under a new id and name.
    pub(crate) fn clone_as(
        &self,
        id: String,
        name: String,
        loader: Arc<NoteInterpreterLoader>,
        listener: Option<Arc<dyn JobListener>>,
    ) -> Self {
        let note = Self::new(id, name, loader, self.repo.clone(), listener);
        note.set_config(self.config());
        {
            let mut paragraphs = note.write_paragraphs();
            for source in self.paragraphs() {
                let paragraph = source.clone_for(&note.id, note.loader.clone());
                paragraphs.push(note.attach(paragraph));
            }
        }
        note
    }

    pub fn to_document(&self) -> NoteDocument {
        NoteDocument {
            id: self.id.clone(),
            name: self.name(),
            config: self.config(),
            interpreters: self.loader.setting_ids(),
            paragraphs: self.paragraphs().iter().map(|p| p.to_document()).collect(),
        }
    }

    fn attach(&self, paragraph: Paragraph) -> Arc<Paragraph> {
        if let Some(listener) = &self.listener {
            paragraph.core().set_listener(listener.clone());
        }
        Arc::new(paragraph)
    }

    fn read_paragraphs(&self) -> RwLockReadGuard<'_, Vec<Arc<Paragraph>>> {
        self.paragraphs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_paragraphs(&self) -> RwLockWriteGuard<'_, Vec<Arc<Paragraph>>> {
        self.paragraphs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.into();
    }

    pub fn config(&self) -> NoteConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the config. Call `Notebook::refresh_cron` to apply cron changes.
    pub fn set_config(&self, config: NoteConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn interpreter_loader(&self) -> &Arc<NoteInterpreterLoader> {
        &self.loader
    }

    /// Append an empty paragraph.
    pub fn add_paragraph(&self) -> Arc<Paragraph> {
        let paragraph = self.attach(Paragraph::new(&self.id, self.loader.clone()));
        self.write_paragraphs().push(paragraph.clone());
        paragraph
    }

    /// Insert an empty paragraph at `index` (clamped to the end).
    pub fn insert_paragraph(&self, index: usize) -> Arc<Paragraph> {
        let paragraph = self.attach(Paragraph::new(&self.id, self.loader.clone()));
        let mut paragraphs = self.write_paragraphs();
        let index = index.min(paragraphs.len());
        paragraphs.insert(index, paragraph.clone());
        paragraph
    }

    /// Remove a paragraph, aborting it first if it is queued or running.
    pub fn remove_paragraph(&self, paragraph_id: &str) -> Result<Arc<Paragraph>> {
        let removed = {
            let mut paragraphs = self.write_paragraphs();
            let index = paragraphs
                .iter()
                .position(|p| p.id() == paragraph_id)
                .ok_or_else(|| self.paragraph_not_found(paragraph_id))?;
            paragraphs.remove(index)
        };

        if removed.status().is_in_flight() {
            self.abort_paragraph(&removed);
        }
        removed.core().clear_listener();
        Ok(removed)
    }

    /// Move a paragraph to `index` (clamped to the end).
    pub fn move_paragraph(&self, paragraph_id: &str, index: usize) -> Result<()> {
        let mut paragraphs = self.write_paragraphs();
        let from = paragraphs
            .iter()
            .position(|p| p.id() == paragraph_id)
            .ok_or_else(|| self.paragraph_not_found(paragraph_id))?;
        let paragraph = paragraphs.remove(from);
        let index = index.min(paragraphs.len());
        paragraphs.insert(index, paragraph);
        Ok(())
    }

    pub fn paragraph(&self, paragraph_id: &str) -> Option<Arc<Paragraph>> {
        self.read_paragraphs()
            .iter()
            .find(|p| p.id() == paragraph_id)
            .cloned()
    }

    pub fn paragraphs(&self) -> Vec<Arc<Paragraph>> {
        self.read_paragraphs().clone()
    }

    pub fn last_paragraph(&self) -> Option<Arc<Paragraph>> {
        self.read_paragraphs().last().cloned()
    }

    fn paragraph_not_found(&self, paragraph_id: &str) -> Error {
        Error::NotFound(format!("paragraph {} in note {}", paragraph_id, self.id))
    }

    /// Refuse every later run. Submissions already in progress complete
    /// before this returns, so a following `abort_all` sees them.
    pub(crate) fn close(&self) {
        *self.removed.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// True once the note was removed from its notebook.
    pub fn is_removed(&self) -> bool {
        *self.removed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn removed_error(&self) -> Error {
        Error::NotFound(format!("note {} has been removed", self.id))
    }

    fn submit(&self, paragraph: &Arc<Paragraph>) -> Result<()> {
        let removed = self.removed.read().unwrap_or_else(PoisonError::into_inner);
        if *removed {
            return Err(self.removed_error());
        }
        let resolved = paragraph.resolve()?;
        let scheduler = self.loader.scheduler_for(&resolved)?;
        scheduler.submit(paragraph.clone())
    }

    fn abort_paragraph(&self, paragraph: &Arc<Paragraph>) {
        let aborted = paragraph
            .resolve()
            .and_then(|resolved| self.loader.scheduler_for(&resolved))
            .map(|scheduler| scheduler.abort_job(paragraph.id()))
            .unwrap_or(false);
        if !aborted && paragraph.core().abort() {
            paragraph.on_abort();
        }
    }

    /// Submit one paragraph to its interpreter's scheduler.
    pub fn run(&self, paragraph_id: &str) -> Result<()> {
        let paragraph = self
            .paragraph(paragraph_id)
            .ok_or_else(|| self.paragraph_not_found(paragraph_id))?;
        self.submit(&paragraph)
    }

    /// Submit every enabled paragraph in order.
    ///
    /// Paragraphs already pending or running are skipped. Every paragraph is
    /// attempted; the first error is returned.
    pub fn run_all(&self) -> Result<()> {
        if self.is_removed() {
            return Err(self.removed_error());
        }
        let mut first_error = None;
        let mut submitted = 0;

        for paragraph in self.paragraphs() {
            if !paragraph.is_enabled() {
                tracing::debug!("Skipping disabled paragraph {}", paragraph.id());
                continue;
            }
            if paragraph.status().is_in_flight() {
                tracing::debug!(
                    "Skipping paragraph {}: already {}",
                    paragraph.id(),
                    paragraph.status()
                );
                continue;
            }
            match self.submit(&paragraph) {
                Ok(()) => submitted += 1,
                Err(Error::Conflict(message)) => {
                    tracing::debug!("Skipping paragraph {}: {}", paragraph.id(), message);
                }
                Err(e) => {
                    tracing::warn!("Failed to submit paragraph {}: {}", paragraph.id(), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        tracing::debug!("Note {} submitted {} paragraph(s)", self.id, submitted);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Abort every pending or running paragraph. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let ids: Vec<String> = self
            .paragraphs()
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        let schedulers = self.loader.factory().scheduler_factory();

        let mut aborted = 0;
        for setting in self.loader.interpreter_settings() {
            if let Some(scheduler) = schedulers.get(&setting.group().scheduler_name()) {
                aborted += scheduler.abort_matching(|job| ids.iter().any(|id| id == job.id()));
            }
        }
        aborted
    }

    /// Reset a paragraph's result and status to `READY`.
    pub fn clear_paragraph_output(&self, paragraph_id: &str) -> Result<()> {
        let paragraph = self
            .paragraph(paragraph_id)
            .ok_or_else(|| self.paragraph_not_found(paragraph_id))?;
        paragraph.core().clear_result()
    }

    /// True when no paragraph is pending or running.
    pub fn is_terminated(&self) -> bool {
        self.read_paragraphs()
            .iter()
            .all(|p| !p.status().is_in_flight())
    }

    /// Block until no paragraph is pending or running. `false` on timeout.
    pub fn wait_until_terminated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for paragraph in self.paragraphs() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if paragraph
                .core()
                .wait_for_status(|s| !s.is_in_flight(), remaining)
                .is_none()
            {
                return false;
            }
        }
        true
    }

    /// Save the note to storage.
    pub fn persist(&self) -> Result<()> {
        self.repo.save(&self.to_document())?;
        tracing::debug!("Persisted note {}", self.id);
        Ok(())
    }
}

impl std::fmt::Debug for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Note")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("paragraphs", &self.read_paragraphs().len())
            .finish()
    }
}
