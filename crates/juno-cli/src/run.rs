//! Run command implementation for Juno CLI.
//!
//! Submits a note's paragraphs, waits for them, prints their output and
//! persists the results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use juno_core::{Error, Job, NotebookConfig, Paragraph, Status};

use crate::colors;
use crate::note;

/// Run a note, or a single paragraph of it.
pub fn execute(
    config: &NotebookConfig,
    key: &str,
    paragraph_id: Option<&str>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let start = Instant::now();

    let notebook = note::open(config)?;
    let note = note::find(&notebook, key)?;

    println!(
        "\n{}Running{} {}{}{} {}({}){}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        note.name(),
        colors::RESET,
        colors::DIM,
        note.id(),
        colors::RESET
    );
    println!("{}", "─".repeat(50));

    let (targets, submitted): (Vec<Arc<Paragraph>>, juno_core::Result<()>) = match paragraph_id {
        Some(id) => {
            let paragraph = note.paragraph(id).ok_or_else(|| {
                Error::NotFound(format!("paragraph {} in note {}", id, note.id()))
            })?;
            (vec![paragraph], note.run(id))
        }
        None => (note.paragraphs(), note.run_all()),
    };

    if targets.is_empty() {
        println!(
            "\n{}No paragraphs found in note.{}",
            colors::YELLOW,
            colors::RESET
        );
        println!("Add one with `juno add {} <text>`", note.id());
        return Ok(());
    }

    let finished = note.wait_until_terminated(Duration::from_secs(timeout_secs));
    if !finished {
        let aborted = note.abort_all();
        tracing::warn!("Aborted {} paragraph(s) after timeout", aborted);
    }
    note.persist()?;

    for paragraph in &targets {
        note::print_paragraph(paragraph);
    }

    submitted?;
    if !finished {
        anyhow::bail!(
            "note {} did not finish within {}s",
            note.id(),
            timeout_secs
        );
    }

    let failed = targets
        .iter()
        .filter(|p| p.status() == Status::Error)
        .count();

    println!("\n{}", "─".repeat(50));
    if failed > 0 {
        anyhow::bail!("{} of {} paragraph(s) failed", failed, targets.len());
    }

    println!(
        "{}Completed{} {} paragraphs in {:.2}s",
        colors::GREEN,
        colors::RESET,
        targets.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
