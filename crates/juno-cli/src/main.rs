//! Juno CLI - interactive notebooks from the terminal.

mod colors;
mod note;
mod run;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use juno_core::NotebookConfig;

#[derive(Parser)]
#[command(name = "juno")]
#[command(about = "Interactive notebooks with scheduled paragraph execution")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Note storage directory (defaults to $JUNO_NOTEBOOK_DIR or ~/.juno/notebook)
    #[arg(long, global = true)]
    notebook_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty note and print its id
    New {
        /// Name of the note
        #[arg(default_value = "")]
        name: String,
    },

    /// Append a paragraph to a note and print its id
    Add {
        /// Note id or name
        note: String,

        /// Paragraph text; start with `%name` to pick an interpreter
        text: String,

        /// Paragraph title
        #[arg(long)]
        title: Option<String>,
    },

    /// List all notes
    List,

    /// Show a note's paragraphs with their status and output
    Show {
        /// Note id or name
        note: String,
    },

    /// Run a note (or one paragraph) and wait for the results
    Run {
        /// Note id or name
        note: String,

        /// Run only this paragraph
        #[arg(long)]
        paragraph: Option<String>,

        /// Seconds to wait for completion
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Copy a note, paragraphs and results included
    Clone {
        /// Note id or name
        note: String,

        /// Name of the copy
        name: String,
    },

    /// Delete a note
    Rm {
        /// Note id or name
        note: String,
    },

    /// Set or clear the cron schedule of a note
    Cron {
        /// Note id or name
        note: String,

        /// Cron expression (sec min hour day-of-month month day-of-week [year]);
        /// omit to disable
        expression: Option<String>,
    },

    /// List interpreter settings
    Interpreters,

    /// Keep running and fire scheduled notes until Ctrl+C
    Serve,
}

fn load_config(notebook_dir: Option<PathBuf>) -> NotebookConfig {
    let config = NotebookConfig::from_env();
    match notebook_dir {
        Some(dir) => config.with_notebook_dir(dir),
        None => config,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format juno-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(juno_err) = err.downcast_ref::<juno_core::Error>() {
            anyhow::anyhow!("{}", juno_err.with_hint())
        } else {
            err
        }
    };

    let config = load_config(cli.notebook_dir);

    match cli.command {
        Commands::New { name } => note::create(&config, &name).map_err(format_error)?,

        Commands::Add { note, text, title } => {
            note::add_paragraph(&config, &note, &text, title).map_err(format_error)?;
        }

        Commands::List => note::list(&config).map_err(format_error)?,

        Commands::Show { note } => note::show(&config, &note).map_err(format_error)?,

        Commands::Run {
            note,
            paragraph,
            timeout,
        } => run::execute(&config, &note, paragraph.as_deref(), timeout).map_err(format_error)?,

        Commands::Clone { note, name } => {
            note::clone(&config, &note, &name).map_err(format_error)?;
        }

        Commands::Rm { note } => note::remove(&config, &note).map_err(format_error)?,

        Commands::Cron { note, expression } => {
            note::cron(&config, &note, expression.as_deref()).map_err(format_error)?;
        }

        Commands::Interpreters => note::interpreters(&config).map_err(format_error)?,

        Commands::Serve => serve::execute(&config).await.map_err(format_error)?,
    }

    Ok(())
}
