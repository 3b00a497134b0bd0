//! Notebook: owns notes and coordinates their lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::config::NotebookConfig;
use crate::error::{Error, Result};
use crate::interpreter::{InterpreterFactory, NoteInterpreterLoader};
use crate::repo::{FsNoteRepo, NoteDocument, NoteRepo};
use crate::scheduler::{JobCore, JobListener, SchedulerFactory};

use super::cron::{CronTriggers, TriggerRegistry};
use super::note::{JobListenerFactory, Note};

/// Manages the set of notes.
///
/// Lock order for cross-component operations is scheduler, then variable
/// registry, then the note map; no two are held at once.
pub struct Notebook {
    notes: Mutex<FxHashMap<String, Arc<Note>>>,
    interpreters: Arc<InterpreterFactory>,
    repo: Arc<dyn NoteRepo>,
    triggers: Arc<dyn TriggerRegistry>,
    listener_factory: Option<Arc<dyn JobListenerFactory>>,
    reload_from_storage: AtomicBool,
}

impl Notebook {
    /// Create a notebook and load every note from storage.
    pub fn new(
        repo: Arc<dyn NoteRepo>,
        interpreters: Arc<InterpreterFactory>,
        triggers: Arc<dyn TriggerRegistry>,
        listener_factory: Option<Arc<dyn JobListenerFactory>>,
    ) -> Result<Self> {
        let notebook = Self {
            notes: Mutex::new(FxHashMap::default()),
            interpreters,
            repo,
            triggers,
            listener_factory,
            reload_from_storage: AtomicBool::new(false),
        };
        let loaded = notebook.sync_from_storage()?;
        tracing::info!("Loaded {} note(s) from storage", loaded);
        Ok(notebook)
    }

    /// Build a notebook from configuration: filesystem storage under
    /// `notebook_dir`, one interpreter setting per configured backend, and a
    /// dedicated cron runtime.
    pub fn from_config(
        config: &NotebookConfig,
        listener_factory: Option<Arc<dyn JobListenerFactory>>,
    ) -> Result<Self> {
        let dirs = config.ensure_dirs()?;
        let repo = Arc::new(FsNoteRepo::new(dirs.notebook_dir)?);
        let interpreters = Arc::new(InterpreterFactory::with_backends(
            Arc::new(SchedulerFactory::new()),
            &config.interpreters,
        )?);
        let triggers = Arc::new(CronTriggers::new()?);

        let notebook = Self::new(repo, interpreters, triggers, listener_factory)?;
        notebook.set_reload_from_storage(config.reload_from_storage);
        Ok(notebook)
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, Arc<Note>>> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn interpreter_factory(&self) -> &Arc<InterpreterFactory> {
        &self.interpreters
    }

    pub fn scheduler_factory(&self) -> &Arc<SchedulerFactory> {
        self.interpreters.scheduler_factory()
    }

    pub fn repo(&self) -> &Arc<dyn NoteRepo> {
        &self.repo
    }

    pub fn triggers(&self) -> &Arc<dyn TriggerRegistry> {
        &self.triggers
    }

    pub fn reload_from_storage(&self) -> bool {
        self.reload_from_storage.load(Ordering::SeqCst)
    }

    /// When set, `get_all_notes` re-syncs with storage before listing.
    pub fn set_reload_from_storage(&self, reload: bool) {
        self.reload_from_storage.store(reload, Ordering::SeqCst);
    }

    fn listener_for(&self, note_id: &str) -> Option<Arc<dyn JobListener>> {
        self.listener_factory
            .as_ref()
            .map(|factory| factory.paragraph_listener(note_id))
    }

    fn new_loader(&self, setting_ids: Vec<String>) -> Result<Arc<NoteInterpreterLoader>> {
        let known: Vec<String> = setting_ids
            .into_iter()
            .filter(|id| {
                let exists = self.interpreters.setting(id).is_some();
                if !exists {
                    tracing::warn!("Dropping binding to unknown interpreter setting '{}'", id);
                }
                exists
            })
            .collect();
        let loader = Arc::new(NoteInterpreterLoader::new(self.interpreters.clone()));
        loader.set_interpreters(known)?;
        Ok(loader)
    }

    fn load_document(&self, doc: NoteDocument) -> Result<Arc<Note>> {
        let setting_ids = if doc.interpreters.is_empty() {
            self.interpreters.default_settings()
        } else {
            doc.interpreters.clone()
        };
        let loader = self.new_loader(setting_ids)?;
        let listener = self.listener_for(&doc.id);
        Ok(Arc::new(Note::from_document(
            doc,
            loader,
            self.repo.clone(),
            listener,
        )))
    }

    /// Create an empty note bound to every interpreter setting.
    ///
    /// An empty name becomes `Note <id>`. The note is not persisted until
    /// [`Note::persist`] is called.
    pub fn create_note(&self, name: &str) -> Result<Arc<Note>> {
        let id = JobCore::generate_id("note");
        let name = if name.trim().is_empty() {
            format!("Note {}", id)
        } else {
            name.to_string()
        };

        let loader = self.new_loader(self.interpreters.default_settings())?;
        let listener = self.listener_for(&id);
        let note = Arc::new(Note::new(id.clone(), name, loader, self.repo.clone(), listener));

        self.lock().insert(id.clone(), note.clone());
        tracing::info!("Created note {} '{}'", id, note.name());
        Ok(note)
    }

    pub fn get_note(&self, id: &str) -> Option<Arc<Note>> {
        self.lock().get(id).cloned()
    }

    fn note_or_not_found(&self, id: &str) -> Result<Arc<Note>> {
        self.get_note(id)
            .ok_or_else(|| Error::NotFound(format!("note {}", id)))
    }

    /// Deep-copy a note under a fresh id and persist the copy.
    pub fn clone_note(&self, source_id: &str, name: &str) -> Result<Arc<Note>> {
        let source = self.note_or_not_found(source_id)?;

        let id = JobCore::generate_id("note");
        let loader = self.new_loader(source.interpreter_loader().setting_ids())?;
        let listener = self.listener_for(&id);
        let note = Arc::new(source.clone_as(id.clone(), name.to_string(), loader, listener));
        note.persist()?;

        self.lock().insert(id.clone(), note.clone());
        tracing::info!("Cloned note {} into {} '{}'", source_id, id, name);
        Ok(note)
    }

    /// Detach a note from the engine: unregister its cron trigger, refuse
    /// further runs, abort its jobs and drop its scoped variables.
    ///
    /// Returns the number of aborted jobs and cleared variables.
    fn teardown(&self, note: &Note) -> (usize, usize) {
        self.triggers.unregister(note.id());
        note.close();

        let aborted = note.abort_all();
        let mut cleared = 0;
        for setting in note.interpreter_loader().interpreter_settings() {
            cleared += setting.group().registry().remove_scope(note.id());
        }
        (aborted, cleared)
    }

    /// Remove a note: tear it down, forget it and delete it from storage.
    pub fn remove_note(&self, id: &str) -> Result<()> {
        let note = self.note_or_not_found(id)?;

        let (aborted, cleared) = self.teardown(&note);
        self.lock().remove(id);
        self.repo.remove(id)?;

        tracing::info!(
            "Removed note {} ({} job(s) aborted, {} variable(s) cleared)",
            id,
            aborted,
            cleared
        );
        Ok(())
    }

    /// All notes sorted by name, then id.
    ///
    /// With reload-from-storage set, notes added to storage by others are
    /// loaded and notes deleted from storage are dropped first.
    pub fn get_all_notes(&self) -> Result<Vec<Arc<Note>>> {
        if self.reload_from_storage() {
            self.sync_from_storage()?;
        }

        let mut notes: Vec<Arc<Note>> = self.lock().values().cloned().collect();
        notes.sort_by(|a, b| a.name().cmp(&b.name()).then_with(|| a.id().cmp(b.id())));
        Ok(notes)
    }

    /// Reconcile the in-memory note set with storage.
    ///
    /// Notes already in memory keep their live state. Returns the number of
    /// newly loaded notes.
    pub fn sync_from_storage(&self) -> Result<usize> {
        let stored = self.repo.list()?;

        let (missing, stale): (Vec<String>, Vec<String>) = {
            let notes = self.lock();
            let missing = stored
                .iter()
                .filter(|info| !notes.contains_key(&info.id))
                .map(|info| info.id.clone())
                .collect();
            let stale = notes
                .keys()
                .filter(|id| !stored.iter().any(|info| &info.id == *id))
                .cloned()
                .collect();
            (missing, stale)
        };

        for id in &stale {
            let removed = self.lock().remove(id);
            if let Some(note) = removed {
                let (aborted, cleared) = self.teardown(&note);
                tracing::debug!(
                    "Dropped note {}: no longer in storage ({} job(s) aborted, {} variable(s) cleared)",
                    id,
                    aborted,
                    cleared
                );
            }
        }

        let mut loaded = 0;
        for id in missing {
            let note = match self.repo.get(&id).and_then(|doc| self.load_document(doc)) {
                Ok(note) => note,
                Err(e) => {
                    tracing::warn!("Failed to load note {}: {}", id, e);
                    continue;
                }
            };
            self.lock().insert(id.clone(), note);
            loaded += 1;

            if let Err(e) = self.refresh_cron(&id) {
                tracing::warn!("Note {} has an unusable cron trigger: {}", id, e);
            }
        }
        Ok(loaded)
    }

    /// Re-read a note's cron config and (un)register its trigger.
    ///
    /// A note with `enabled` set and a non-empty `cron` expression runs all
    /// its paragraphs on every firing.
    pub fn refresh_cron(&self, id: &str) -> Result<()> {
        let note = self.note_or_not_found(id)?;
        self.triggers.unregister(id);

        let config = note.config();
        let Some(expression) = config.active_cron() else {
            return Ok(());
        };

        let weak = Arc::downgrade(&note);
        let note_id = id.to_string();
        self.triggers.register(
            id,
            expression,
            Arc::new(move || {
                let Some(note) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = note.run_all() {
                    tracing::error!("Cron run of note {} failed: {}", note_id, e);
                }
            }),
        )
    }

    /// Abort everything and stop every scheduler.
    pub fn shutdown(&self) {
        let notes: Vec<Arc<Note>> = self.lock().values().cloned().collect();
        for note in &notes {
            self.triggers.unregister(note.id());
        }
        self.scheduler_factory().destroy();
        self.interpreters.close();
    }
}

impl std::fmt::Debug for Notebook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notebook")
            .field("notes", &self.lock().len())
            .field("reload_from_storage", &self.reload_from_storage())
            .finish()
    }
}
