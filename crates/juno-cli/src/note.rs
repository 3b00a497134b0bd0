//! Note management commands: new, add, list, show, clone, rm, cron.

use std::sync::Arc;

use juno_core::{Error, Job, Note, Notebook, NotebookConfig, Paragraph};

use crate::colors;

/// Open the notebook stored under the configured directory.
pub fn open(config: &NotebookConfig) -> anyhow::Result<Notebook> {
    Ok(Notebook::from_config(config, None)?)
}

/// Look a note up by id, then by exact name.
pub fn find(notebook: &Notebook, key: &str) -> juno_core::Result<Arc<Note>> {
    if let Some(note) = notebook.get_note(key) {
        return Ok(note);
    }

    let mut matches: Vec<Arc<Note>> = notebook
        .get_all_notes()?
        .into_iter()
        .filter(|note| note.name() == key)
        .collect();
    match matches.len() {
        0 => Err(Error::NotFound(format!("note {}", key))),
        1 => Ok(matches.remove(0)),
        n => Err(Error::Conflict(format!(
            "{} notes are named '{}'; use the note id",
            n, key
        ))),
    }
}

pub fn create(config: &NotebookConfig, name: &str) -> anyhow::Result<()> {
    let notebook = open(config)?;
    let note = notebook.create_note(name)?;
    note.persist()?;
    println!("{}", note.id());
    Ok(())
}

pub fn add_paragraph(
    config: &NotebookConfig,
    key: &str,
    text: &str,
    title: Option<String>,
) -> anyhow::Result<()> {
    let notebook = open(config)?;
    let note = find(&notebook, key)?;

    let paragraph = note.add_paragraph();
    paragraph.set_text(text);
    paragraph.set_title(title);
    if let Err(e) = paragraph.resolve() {
        note.remove_paragraph(paragraph.id())?;
        return Err(e.into());
    }
    note.persist()?;

    println!("{}", paragraph.id());
    Ok(())
}

pub fn list(config: &NotebookConfig) -> anyhow::Result<()> {
    let notebook = open(config)?;
    let notes = notebook.get_all_notes()?;

    if notes.is_empty() {
        println!("{}No notes found.{}", colors::YELLOW, colors::RESET);
        println!("Create one with `juno new <name>`");
        return Ok(());
    }

    for note in notes {
        let schedule = note
            .config()
            .active_cron()
            .map(|expr| format!("  {}cron: {}{}", colors::CYAN, expr, colors::RESET))
            .unwrap_or_default();
        println!(
            "{}  {}{}{}  {}({} paragraphs){}{}",
            note.id(),
            colors::BOLD,
            note.name(),
            colors::RESET,
            colors::DIM,
            note.paragraphs().len(),
            colors::RESET,
            schedule
        );
    }
    Ok(())
}

pub fn show(config: &NotebookConfig, key: &str) -> anyhow::Result<()> {
    let notebook = open(config)?;
    let note = find(&notebook, key)?;

    println!(
        "\n{}{}{} {}({}){}",
        colors::BOLD,
        note.name(),
        colors::RESET,
        colors::DIM,
        note.id(),
        colors::RESET
    );
    if let Some(expr) = note.config().active_cron() {
        println!("{}  ◆ Cron:{} {}", colors::CYAN, colors::RESET, expr);
    }
    println!("{}", "─".repeat(50));

    for paragraph in note.paragraphs() {
        print_paragraph(&paragraph);
    }
    Ok(())
}

/// Print a paragraph header line, its text and its result.
pub fn print_paragraph(paragraph: &Paragraph) {
    let status = paragraph.status();
    let title = paragraph
        .title()
        .map(|title| format!(" {}", title))
        .unwrap_or_default();
    let disabled = if paragraph.is_enabled() {
        ""
    } else {
        " (disabled)"
    };
    println!(
        "{}{:<8}{} {}{}{}{}",
        colors::status(status),
        status,
        colors::RESET,
        paragraph.id(),
        colors::BOLD,
        title,
        colors::RESET
    );
    println!("{}  > {}{}{}", colors::DIM, paragraph.text(), disabled, colors::RESET);

    if let Some(result) = paragraph.result() {
        for line in result.message().trim_end().lines() {
            println!("    {}", line);
        }
    }
}

pub fn clone(config: &NotebookConfig, key: &str, name: &str) -> anyhow::Result<()> {
    let notebook = open(config)?;
    let source = find(&notebook, key)?;
    let note = notebook.clone_note(source.id(), name)?;
    println!("{}", note.id());
    Ok(())
}

pub fn remove(config: &NotebookConfig, key: &str) -> anyhow::Result<()> {
    let notebook = open(config)?;
    let note = find(&notebook, key)?;
    notebook.remove_note(note.id())?;
    println!("{}Removed{} {}", colors::GREEN, colors::RESET, note.id());
    Ok(())
}

pub fn cron(config: &NotebookConfig, key: &str, expression: Option<&str>) -> anyhow::Result<()> {
    let notebook = open(config)?;
    let note = find(&notebook, key)?;

    let previous = note.config();
    let mut updated = previous.clone();
    updated.enabled = expression.is_some();
    updated.cron = expression.map(str::to_string);
    note.set_config(updated);

    if let Err(e) = notebook.refresh_cron(note.id()) {
        note.set_config(previous);
        return Err(e.into());
    }
    note.persist()?;

    match expression {
        Some(expr) => println!(
            "{}Scheduled{} {} with '{}'; run `juno serve` to fire it",
            colors::GREEN,
            colors::RESET,
            note.id(),
            expr
        ),
        None => println!("{}Unscheduled{} {}", colors::GREEN, colors::RESET, note.id()),
    }
    Ok(())
}

pub fn interpreters(config: &NotebookConfig) -> anyhow::Result<()> {
    let notebook = open(config)?;

    for setting in notebook.interpreter_factory().settings() {
        let group = setting.group();
        let names: Vec<&str> = group.specs().iter().map(|spec| spec.name.as_str()).collect();
        println!(
            "{}{}{}  {}  {}[{}]{}",
            colors::BOLD,
            setting.name(),
            colors::RESET,
            names.join(", "),
            colors::DIM,
            group.scheduler_policy(),
            colors::RESET
        );
    }
    Ok(())
}
