//! Serve command implementation for Juno CLI.
//!
//! Keeps the notebook loaded so cron triggers fire, reports paragraph
//! transitions and persists notes whose paragraphs finished.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use juno_core::{JobCore, JobListener, JobListenerFactory, Notebook, NotebookConfig, Status};

use crate::colors;

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

type DirtyNotes = Arc<Mutex<HashSet<String>>>;

/// Attaches a [`ParagraphReporter`] to every paragraph of every note.
struct ReporterFactory {
    dirty: DirtyNotes,
}

impl JobListenerFactory for ReporterFactory {
    fn paragraph_listener(&self, note_id: &str) -> Arc<dyn JobListener> {
        Arc::new(ParagraphReporter {
            note_id: note_id.to_string(),
            dirty: self.dirty.clone(),
        })
    }
}

struct ParagraphReporter {
    note_id: String,
    dirty: DirtyNotes,
}

impl JobListener for ParagraphReporter {
    fn after_status_change(&self, job: &JobCore, _before: Status, after: Status) {
        if after != Status::Running && !after.is_terminated() {
            return;
        }
        println!(
            "{}  ◆ {:<8}{} {} {}{}{}",
            colors::status(after),
            after,
            colors::RESET,
            job.id(),
            colors::DIM,
            self.note_id,
            colors::RESET
        );
        if after.is_terminated() {
            self.dirty
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(self.note_id.clone());
        }
    }
}

fn flush(notebook: &Notebook, dirty: &DirtyNotes) {
    let ids: Vec<String> = dirty
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for id in ids {
        let Some(note) = notebook.get_note(&id) else {
            continue;
        };
        if let Err(e) = note.persist() {
            tracing::error!("Failed to persist note {}: {}", id, e);
        }
    }
}

/// Run until Ctrl+C, firing scheduled notes.
pub async fn execute(config: &NotebookConfig) -> anyhow::Result<()> {
    let dirty: DirtyNotes = Arc::new(Mutex::new(HashSet::new()));
    let notebook = Notebook::from_config(
        config,
        Some(Arc::new(ReporterFactory {
            dirty: dirty.clone(),
        })),
    )?;

    println!(
        "\n{}Juno Server{} - Scheduled Notebooks",
        colors::BOLD,
        colors::RESET
    );
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Notebook:{} {}",
        colors::CYAN,
        colors::RESET,
        config.notebook_dir.display()
    );

    let notes = notebook.get_all_notes()?;
    let scheduled: Vec<_> = notes
        .iter()
        .filter_map(|note| note.config().active_cron().map(|expr| (note.clone(), expr.to_string())))
        .collect();
    println!(
        "{}  ◆ Notes:{} {} ({} scheduled)",
        colors::CYAN,
        colors::RESET,
        notes.len(),
        scheduled.len()
    );
    for (note, expr) in &scheduled {
        println!(
            "    {}{}{} {}{}{}",
            colors::BOLD,
            note.name(),
            colors::RESET,
            colors::DIM,
            expr,
            colors::RESET
        );
    }
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = ticker.tick() => flush(&notebook, &dirty),
        }
    }

    println!("\n{}Shutting down{}", colors::YELLOW, colors::RESET);
    notebook.shutdown();
    flush(&notebook, &dirty);
    Ok(())
}
