//! Paragraph: one executable unit of a note.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::interpreter::{InterpreterContext, NoteInterpreterLoader, ResolvedInterpreter};
use crate::repo::ParagraphDocument;
use crate::scheduler::{Job, JobCore, JobResult};

/// Per-paragraph configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphConfig {
    /// Disabled paragraphs are skipped by `run_all`.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for ParagraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extra: serde_json::Map::new(),
        }
    }
}

/// Split `%name rest` into the interpreter name and the script.
///
/// Text without a leading `%name` is returned unchanged with no name.
pub fn split_interpreter(text: &str) -> (Option<&str>, &str) {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix('%') else {
        return (None, text);
    };
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    if end == 0 {
        return (None, text);
    }
    (Some(&rest[..end]), rest[end..].trim_start())
}

/// A code unit of a note, scheduled as a job.
pub struct Paragraph {
    core: JobCore,
    note_id: String,
    title: RwLock<Option<String>>,
    text: RwLock<String>,
    config: RwLock<ParagraphConfig>,
    loader: Arc<NoteInterpreterLoader>,
}

impl Paragraph {
    pub(crate) fn new(note_id: &str, loader: Arc<NoteInterpreterLoader>) -> Self {
        Self::with_core(JobCore::new(JobCore::generate_id("paragraph")), note_id, loader)
    }

    fn with_core(core: JobCore, note_id: &str, loader: Arc<NoteInterpreterLoader>) -> Self {
        Self {
            core,
            note_id: note_id.to_string(),
            title: RwLock::new(None),
            text: RwLock::new(String::new()),
            config: RwLock::new(ParagraphConfig::default()),
            loader,
        }
    }

    /// Rebuild a stored paragraph. In-flight paragraphs come back as `ABORT`.
    pub(crate) fn from_document(
        note_id: &str,
        loader: Arc<NoteInterpreterLoader>,
        doc: ParagraphDocument,
    ) -> Self {
        let paragraph = Self::with_core(JobCore::restore(doc.id, doc.job), note_id, loader);
        paragraph.set_title(doc.title);
        paragraph.set_text(doc.text);
        paragraph.set_config(doc.config);
        paragraph
    }

    /// Copy under a fresh id for another note.
    ///
    /// `FINISHED`/`ERROR` paragraphs keep their status, result and
    /// timestamps; anything else starts over as `READY`.
    pub(crate) fn clone_for(&self, note_id: &str, loader: Arc<NoteInterpreterLoader>) -> Self {
        let id = JobCore::generate_id("paragraph");
        let snapshot = self.core.snapshot();
        let core = if snapshot.status.is_completed() {
            JobCore::restore(id, snapshot)
        } else {
            JobCore::new(id)
        };

        let paragraph = Self::with_core(core, note_id, loader);
        paragraph.set_title(self.title());
        paragraph.set_text(self.text());
        paragraph.set_config(self.config());
        paragraph
    }

    pub fn to_document(&self) -> ParagraphDocument {
        ParagraphDocument {
            id: self.core.id().to_string(),
            title: self.title(),
            text: self.text(),
            config: self.config(),
            job: self.core.snapshot(),
        }
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn title(&self) -> Option<String> {
        self.title
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_title(&self, title: Option<String>) {
        *self.title.write().unwrap_or_else(PoisonError::into_inner) = title;
    }

    pub fn text(&self) -> String {
        self.text
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.write().unwrap_or_else(PoisonError::into_inner) = text.into();
    }

    pub fn config(&self) -> ParagraphConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_config(&self, config: ParagraphConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn is_enabled(&self) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled
    }

    pub fn result(&self) -> Option<JobResult> {
        self.core.result()
    }

    /// Interpreter this paragraph would run on right now.
    pub fn resolve(&self) -> Result<ResolvedInterpreter> {
        let text = self.text();
        let (name, _) = split_interpreter(&text);
        self.loader.resolve(name)
    }
}

impl Job for Paragraph {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self) -> Result<JobResult> {
        let text = self.text();
        let (name, script) = split_interpreter(&text);
        let resolved = self.loader.resolve(name)?;
        let title = self.title();
        let config = self.config();

        let ctx = InterpreterContext::new(
            &self.core,
            &self.note_id,
            title.as_deref(),
            &text,
            &config.extra,
            resolved.setting.group().registry(),
        );
        tracing::debug!(
            "Running paragraph {} on '{}'",
            self.core.id(),
            resolved.interpreter.name()
        );
        resolved.interpreter.interpret(script, &ctx)
    }

    fn on_abort(&self) {
        let Ok(resolved) = self.resolve() else {
            return;
        };
        let text = self.text();
        let config = self.config();
        let ctx = InterpreterContext::new(
            &self.core,
            &self.note_id,
            None,
            &text,
            &config.extra,
            resolved.setting.group().registry(),
        );
        resolved.interpreter.cancel(&ctx);
    }
}

impl std::fmt::Debug for Paragraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paragraph")
            .field("id", &self.core.id())
            .field("status", &self.core.status())
            .field("text", &self.text())
            .finish()
    }
}
