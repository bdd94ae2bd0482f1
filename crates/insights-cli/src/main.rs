//! Insights CLI
//!
//! Command-line interface for Insights - sticky notes with optional cloud sync.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use insights_core::{Config, StorageError, SyncError, SyncStore};

mod commands;
mod editor;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "insights")]
#[command(about = "Insights - sticky notes that follow you to the cloud")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Search notes by title or content
    Search {
        /// Search query
        query: String,
    },
    /// Set the manual order of notes
    Reorder {
        /// Note IDs (full UUID or prefix) in the wanted order; others follow
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Export local notes to a backup file
    Export {
        /// Directory to write the backup to
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Replace local notes with a backup file
    Import {
        /// Backup file
        path: PathBuf,
    },
    /// Sign in to cloud sync
    Login {
        /// Access token from the sign-in redirect
        #[arg(long)]
        token: Option<String>,
        /// Refresh token from the sign-in redirect
        #[arg(long, requires = "token")]
        refresh_token: Option<String>,
        /// Print the sign-in URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Sign out and go back to local notes
    Logout,
    /// Show where notes are stored and who is signed in
    Status,
    /// Print the note list now and whenever it changes
    Watch,
    /// Show or set the language used by the assistant
    Language {
        /// Language code (pt-BR, en, es)
        code: Option<String>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Rewrite a note more clearly with AI
    Enhance {
        /// Note ID (full UUID or prefix)
        id: String,
        /// Save the result as the note's content
        #[arg(long)]
        apply: bool,
    },
    /// Summarize a note in one sentence
    Summarize {
        /// Note ID (full UUID or prefix)
        id: String,
    },
    /// Read a note aloud into a WAV file
    Speak {
        /// Note ID (full UUID or prefix)
        id: String,
        /// Output file (defaults to <id>.wav)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Create a new note
    #[command(alias = "add")]
    Create {
        /// Note content (opens editor if not provided)
        content: Option<String>,
        /// Note title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// Color (yellow, blue, green, pink, purple, orange)
        #[arg(short, long)]
        color: Option<String>,
        /// Scheduled date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        /// Scheduled time (HH:MM)
        #[arg(long)]
        time: Option<String>,
    },
    /// List all notes
    #[command(alias = "ls")]
    List,
    /// Show a note
    Show {
        /// Note ID (full UUID or prefix)
        id: String,
    },
    /// Edit a note (opens editor when no field is given)
    Edit {
        /// Note ID (full UUID or prefix)
        id: String,
        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// New content
        #[arg(short = 'b', long)]
        content: Option<String>,
        /// New color
        #[arg(short, long)]
        color: Option<String>,
        /// New date (YYYY-MM-DD)
        #[arg(long, conflicts_with = "clear_schedule")]
        date: Option<String>,
        /// New time (HH:MM)
        #[arg(long, conflicts_with = "clear_schedule")]
        time: Option<String>,
        /// Remove date and time
        #[arg(long)]
        clear_schedule: bool,
    },
    /// Delete a note
    #[command(alias = "rm")]
    Delete {
        /// Note ID (full UUID or prefix)
        id: String,
    },
    /// Move a note to a position in the manual order
    #[command(alias = "mv")]
    Move {
        /// Note ID (full UUID or prefix)
        id: String,
        /// Zero-based position
        position: usize,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value ("none" clears optional values)
        value: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:?}", e);
        if let Some(hint) = recovery_hint(&e) {
            eprintln!();
            eprintln!("Hint: {}", hint);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work even with a broken data directory
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let mut store = SyncStore::open(&config).await;

    match cli.command {
        Commands::Note { command } => handle_note_command(command, &store, &output).await,
        Commands::Search { query } => commands::note::search(&store, query, &output).await,
        Commands::Reorder { ids } => commands::note::reorder(&store, ids, &output).await,
        Commands::Export { dir } => commands::backup::export(&store, dir, &output),
        Commands::Import { path } => commands::backup::import(&store, path, &output),
        Commands::Login {
            token,
            refresh_token,
            no_browser,
        } => commands::auth::login(&mut store, token, refresh_token, no_browser, &output).await,
        Commands::Logout => commands::auth::logout(&mut store, &output).await,
        Commands::Status => commands::status::show(&store, &config, &output).await,
        Commands::Watch => commands::watch::watch(&mut store, output).await,
        Commands::Language { code } => commands::language::language(&store, code, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Enhance { id, apply } => {
            commands::assist::enhance(&store, &config, id, apply, &output).await
        }
        Commands::Summarize { id } => {
            commands::assist::summarize(&store, &config, id, &output).await
        }
        Commands::Speak { id, out } => {
            commands::assist::speak(&store, &config, id, out, &output).await
        }
    }
}

/// What the user can do about a local storage failure
fn recovery_hint(error: &anyhow::Error) -> Option<&'static str> {
    error.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<StorageError>() {
            return e.recovery_suggestion();
        }
        cause
            .downcast_ref::<SyncError>()
            .and_then(SyncError::storage_error)
            .and_then(StorageError::recovery_suggestion)
    })
}

async fn handle_note_command(
    command: NoteCommands,
    store: &SyncStore,
    output: &Output,
) -> Result<()> {
    match command {
        NoteCommands::Create {
            content,
            title,
            color,
            date,
            time,
        } => {
            let input = commands::note::NoteInput {
                title,
                content,
                color,
                date,
                time,
            };
            commands::note::create(store, input, output).await
        }
        NoteCommands::List => commands::note::list(store, output).await,
        NoteCommands::Show { id } => commands::note::show(store, id, output).await,
        NoteCommands::Edit {
            id,
            title,
            content,
            color,
            date,
            time,
            clear_schedule,
        } => {
            let input = commands::note::NoteInput {
                title,
                content,
                color,
                date,
                time,
            };
            commands::note::edit(store, id, input, clear_schedule, output).await
        }
        NoteCommands::Delete { id } => commands::note::delete(store, id, output).await,
        NoteCommands::Move { id, position } => {
            commands::note::move_to(store, id, position, output).await
        }
    }
}

/// Initialize logging
///
/// The level comes from INSIGHTS_LOG (default "warn", "debug" with -v).
/// Logs go to config.log_file when set, stderr otherwise.
fn init_logging(config: &Config, verbose: bool) {
    let log_level = std::env::var("INSIGHTS_LOG")
        .ok()
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| if verbose { "debug" } else { "warn" }.to_string());

    let env_filter = EnvFilter::new(format!(
        "insights_core={},insights_cli={}",
        log_level, log_level
    ));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    if let Some(ref log_path) = config.log_file {
        match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(file) => {
                // Ignore error if already initialized
                let _ = builder.with_ansi(false).with_writer(file).try_init();
                return;
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            }
        }
    }

    let _ = builder.with_writer(std::io::stderr).try_init();
}
