//! Arbor CLI
//!
//! Command-line interface for Arbor: local workspaces, notes and blocks,
//! plus manual and scheduled sync with an Arbor server.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use arbor_core::{Config, Store};

mod commands;
mod editor;
mod output;

use commands::block::DEFAULT_BLOCK_TYPE;
use commands::conflict::Keep;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Arbor - local-first notes with server sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workspaces
    #[command(alias = "ws")]
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Manage blocks inside a note
    Block {
        #[command(subcommand)]
        command: BlockCommands,
    },
    /// Sync with the server now
    Sync,
    /// Sync periodically until interrupted
    Watch {
        /// Seconds between runs (default: sync_interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Show local contents and sync status
    Status,
    /// Show the change log
    Log {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        /// Only entries not yet delivered
        #[arg(long)]
        pending: bool,
    },
    /// List rows the server refused
    Conflicts,
    /// Settle a conflict by picking a side
    Resolve {
        /// Entity ID (full UUID or prefix)
        id: String,
        /// Which copy to keep
        #[arg(long, value_enum)]
        keep: Keep,
    },
    /// Store server URL and credentials
    Login {
        /// Server base URL, e.g. http://localhost:8080
        url: String,
        /// User id the token belongs to
        #[arg(short, long)]
        user: String,
        /// Bearer token issued by the server operator
        #[arg(short, long)]
        token: String,
    },
    /// Forget the stored token
    Logout,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    /// Create a workspace
    #[command(alias = "add")]
    Create {
        /// Workspace name
        name: String,
    },
    /// List workspaces
    #[command(alias = "ls")]
    List,
    /// Show a workspace and its notes
    Show {
        /// Workspace ID (full UUID or prefix)
        id: String,
    },
    /// Rename a workspace
    Rename {
        /// Workspace ID (full UUID or prefix)
        id: String,
        /// New name
        name: String,
    },
    /// Pin or unpin a workspace
    Favorite {
        /// Workspace ID (full UUID or prefix)
        id: String,
        /// Unpin instead of pin
        #[arg(long)]
        off: bool,
    },
    /// Delete a workspace with everything in it
    #[command(alias = "rm")]
    Delete {
        /// Workspace ID (full UUID or prefix)
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Create a note
    #[command(alias = "add")]
    Create {
        /// Workspace ID (full UUID or prefix)
        workspace: String,
        /// Note title
        title: String,
        /// Parent note ID (full UUID or prefix)
        #[arg(short, long)]
        parent: Option<String>,
        /// Note content
        #[arg(short, long)]
        content: Option<String>,
    },
    /// List the notes of a workspace
    #[command(alias = "ls")]
    List {
        /// Workspace ID (full UUID or prefix)
        workspace: String,
    },
    /// Show a note with its blocks
    Show {
        /// Note ID (full UUID or prefix)
        id: String,
    },
    /// Edit title or content (opens $EDITOR when neither is given)
    Edit {
        /// Note ID (full UUID or prefix)
        id: String,
        #[arg(short = 'T', long)]
        title: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
    },
    /// Move a note under another note, or to the root
    #[command(alias = "mv")]
    Move {
        /// Note ID (full UUID or prefix)
        id: String,
        /// New parent note; omit to move to the workspace root
        #[arg(short, long)]
        parent: Option<String>,
    },
    /// Pin or unpin a note
    Favorite {
        /// Note ID (full UUID or prefix)
        id: String,
        /// Unpin instead of pin
        #[arg(long)]
        off: bool,
    },
    /// Delete a note with its sub-notes
    #[command(alias = "rm")]
    Delete {
        /// Note ID (full UUID or prefix)
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum BlockCommands {
    /// Add a block to a note
    Add {
        /// Note ID (full UUID or prefix)
        note: String,
        /// Block content
        content: String,
        /// Block type
        #[arg(short = 'T', long = "type", default_value = DEFAULT_BLOCK_TYPE)]
        block_type: String,
        /// Insert at this position (default: end)
        #[arg(short, long)]
        position: Option<i64>,
    },
    /// List the blocks of a note
    #[command(alias = "ls")]
    List {
        /// Note ID (full UUID or prefix)
        note: String,
    },
    /// Change content or type of a block
    Edit {
        /// Block ID (full UUID or prefix)
        id: String,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(short = 'T', long = "type")]
        block_type: Option<String>,
    },
    /// Move a block to a new position
    #[command(alias = "mv")]
    Move {
        /// Block ID (full UUID or prefix)
        id: String,
        /// Zero-based target position
        position: i64,
    },
    /// Delete a block
    #[command(alias = "rm")]
    Delete {
        /// Block ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, sync_url, sync_enabled, user_id, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

impl Commands {
    /// Commands that change local data and should be pushed afterwards
    fn is_write(&self) -> bool {
        match self {
            Commands::Workspace { command } => !matches!(
                command,
                WorkspaceCommands::List | WorkspaceCommands::Show { .. }
            ),
            Commands::Note { command } => {
                !matches!(command, NoteCommands::List { .. } | NoteCommands::Show { .. })
            }
            Commands::Block { command } => !matches!(command, BlockCommands::List { .. }),
            Commands::Resolve { .. } => true,
            _ => false,
        }
    }
}

/// Log to the configured file, or to stderr
fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("arbor_core={},arbor_cli={}", level, level))
    });

    match config.log_file {
        Some(ref path) => {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_deref();

    // Commands that only touch the config file
    match &cli.command {
        Commands::Config { command } => {
            return match command.clone() {
                Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
                Some(ConfigCommands::Set { key, value }) => {
                    commands::config::set(key, value, config_path, &output)
                }
            };
        }
        Commands::Logout => return commands::auth::logout(config_path, &output),
        _ => {}
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    if let Commands::Login { url, user, token } = cli.command {
        return commands::auth::login(config_path, url, user, token, &output).await;
    }

    let is_write = cli.command.is_write();
    let mut store = Store::open(&config).map_err(|e| match e.recovery_suggestion() {
        Some(hint) => anyhow::anyhow!("{}\n  {}", e, hint),
        None => anyhow::Error::new(e).context("Failed to open local store"),
    })?;

    let result = match cli.command {
        Commands::Workspace { command } => {
            handle_workspace_command(command, &mut store, &config, &output)
        }
        Commands::Note { command } => handle_note_command(command, &mut store, &output),
        Commands::Block { command } => handle_block_command(command, &mut store, &output),
        Commands::Status => commands::status::show(&store, &config, &output),
        Commands::Log { limit, pending } => commands::log::show(&store, limit, pending, &output),
        Commands::Conflicts => commands::conflict::list(&store, &output),
        Commands::Resolve { id, keep } => commands::conflict::resolve(&mut store, id, keep, &output),
        Commands::Sync => {
            return commands::sync::sync(&config, Arc::new(Mutex::new(store)), &output).await;
        }
        Commands::Watch { interval } => {
            return commands::sync::watch(&config, Arc::new(Mutex::new(store)), interval, &output)
                .await;
        }
        Commands::Login { .. } | Commands::Logout | Commands::Config { .. } => Ok(()),
    };

    // Push local writes right away when sync is set up
    if result.is_ok() && is_write && config.is_sync_configured() {
        if let Err(e) = commands::sync::sync_quiet(&config, Arc::new(Mutex::new(store))).await {
            if !output.is_quiet() {
                eprintln!("⚠ Auto-sync failed: {:#}", e);
            }
        }
    }

    result
}

fn handle_workspace_command(
    command: WorkspaceCommands,
    store: &mut Store,
    config: &Config,
    output: &Output,
) -> Result<()> {
    use commands::workspace;

    match command {
        WorkspaceCommands::Create { name } => workspace::create(store, config, name, output),
        WorkspaceCommands::List => workspace::list(store, output),
        WorkspaceCommands::Show { id } => workspace::show(store, id, output),
        WorkspaceCommands::Rename { id, name } => workspace::rename(store, id, name, output),
        WorkspaceCommands::Favorite { id, off } => workspace::favorite(store, id, !off, output),
        WorkspaceCommands::Delete { id, yes } => workspace::delete(store, id, yes, output),
    }
}

fn handle_note_command(command: NoteCommands, store: &mut Store, output: &Output) -> Result<()> {
    use commands::note;

    match command {
        NoteCommands::Create {
            workspace,
            title,
            parent,
            content,
        } => note::create(store, workspace, title, parent, content, output),
        NoteCommands::List { workspace } => note::list(store, workspace, output),
        NoteCommands::Show { id } => note::show(store, id, output),
        NoteCommands::Edit { id, title, content } => note::edit(store, id, title, content, output),
        NoteCommands::Move { id, parent } => note::move_to(store, id, parent, output),
        NoteCommands::Favorite { id, off } => note::favorite(store, id, !off, output),
        NoteCommands::Delete { id, yes } => note::delete(store, id, yes, output),
    }
}

fn handle_block_command(command: BlockCommands, store: &mut Store, output: &Output) -> Result<()> {
    use commands::block;

    match command {
        BlockCommands::Add {
            note,
            content,
            block_type,
            position,
        } => block::add(store, note, content, block_type, position, output),
        BlockCommands::List { note } => block::list(store, note, output),
        BlockCommands::Edit {
            id,
            content,
            block_type,
        } => block::edit(store, id, content, block_type, output),
        BlockCommands::Move { id, position } => block::move_to(store, id, position, output),
        BlockCommands::Delete { id } => block::delete(store, id, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_write_commands_are_detected() {
        let cli = Cli::parse_from(["arbor", "note", "create", "abc", "Title"]);
        assert!(cli.command.is_write());

        let cli = Cli::parse_from(["arbor", "--json", "note", "ls", "abc"]);
        assert!(!cli.command.is_write());
        assert!(cli.json);

        let cli = Cli::parse_from(["arbor", "resolve", "abc", "--keep", "remote"]);
        assert!(cli.command.is_write());
        assert!(matches!(
            cli.command,
            Commands::Resolve {
                keep: Keep::Remote,
                ..
            }
        ));
    }

    #[test]
    fn test_block_type_defaults_to_text() {
        let cli = Cli::parse_from(["arbor", "block", "add", "abc", "hello"]);
        match cli.command {
            Commands::Block {
                command: BlockCommands::Add { block_type, .. },
            } => assert_eq!(block_type, DEFAULT_BLOCK_TYPE),
            _ => panic!("expected block add"),
        }
    }
}
