//! Note storage.
//!
//! Notes are persisted as [`NoteDocument`]s: plain serde structs detached
//! from the live job machinery. Loading turns a document back into a note;
//! paragraphs stored while in flight come back as `ABORT`.

mod fs;
mod memory;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::notebook::{NoteConfig, ParagraphConfig};
use crate::scheduler::JobSnapshot;

pub use fs::FsNoteRepo;
pub use memory::MemoryNoteRepo;

/// Listing entry for a stored note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteInfo {
    pub id: String,
    pub name: String,
}

/// Stored form of a paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
    #[serde(default)]
    pub config: ParagraphConfig,
    #[serde(flatten)]
    pub job: JobSnapshot,
}

/// Stored form of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub config: NoteConfig,
    /// Ids of the interpreter settings bound to the note, in order.
    #[serde(default)]
    pub interpreters: Vec<String>,
    #[serde(default)]
    pub paragraphs: Vec<ParagraphDocument>,
}

impl NoteDocument {
    pub fn info(&self) -> NoteInfo {
        NoteInfo {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Storage backend for notes.
pub trait NoteRepo: Send + Sync {
    /// All stored notes, sorted by id.
    fn list(&self) -> Result<Vec<NoteInfo>>;

    /// Load a note. `NotFound` if it is not stored.
    fn get(&self, id: &str) -> Result<NoteDocument>;

    /// Create or overwrite a note.
    fn save(&self, note: &NoteDocument) -> Result<()>;

    /// Delete a note. Removing a missing note is not an error.
    fn remove(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobResult, Status};
    use chrono::Utc;

    #[test]
    fn test_document_json_layout() {
        let doc = NoteDocument {
            id: "note1".to_string(),
            name: "demo".to_string(),
            config: NoteConfig::default(),
            interpreters: vec!["echo".to_string()],
            paragraphs: vec![ParagraphDocument {
                id: "p1".to_string(),
                title: None,
                text: "hello".to_string(),
                config: ParagraphConfig::default(),
                job: JobSnapshot {
                    status: Status::Finished,
                    result: Some(JobResult::success("echo: hello")),
                    date_created: Utc::now(),
                    date_started: None,
                    date_finished: None,
                },
            }],
        };

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["paragraphs"][0]["status"], "FINISHED");
        assert_eq!(value["paragraphs"][0]["result"]["code"], "SUCCESS");
        assert_eq!(value["paragraphs"][0]["config"]["enabled"], true);
        assert!(value["paragraphs"][0].get("title").is_none());

        let back: NoteDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_minimal_document() {
        let doc: NoteDocument = serde_json::from_str(r#"{"id":"n","name":"x"}"#).unwrap();
        assert!(doc.paragraphs.is_empty());
        assert!(!doc.config.enabled);
        assert!(doc.config.cron.is_none());
    }
}
