//! pdfshelf CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use pdfshelf::{
    commands::{
        cmd_add, cmd_create_collection, cmd_export, cmd_init, cmd_list, cmd_list_collections,
        cmd_move, cmd_progress, cmd_recent, cmd_remove, cmd_remove_collection, cmd_rename,
        cmd_repair, cmd_show, cmd_status, print_add_report, print_collections, print_document,
        print_documents, print_status, AddOptions, MoveTarget,
    },
    config::Config,
    error::{Error, Result},
    progress::ProgressAwareWriter,
    query::{CollectionFilter, DocumentQuery, SortOrder},
    store::LibraryStore,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdfshelf")]
#[command(version, about = "Local PDF library with collections and reading progress", long_about = None)]
struct Cli {
    /// Config file (.toml) or directory holding config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and library database
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Upload PDF files or directories of PDFs
    Add {
        /// Files or directories to add
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Collection ID to file the documents under
        #[arg(long)]
        collection: Option<String>,

        /// Display name (single file only; defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List documents
    List {
        /// Only documents in this collection
        #[arg(long, conflicts_with = "uncategorized")]
        collection: Option<String>,

        /// Only documents without a collection
        #[arg(long)]
        uncategorized: bool,

        /// Case-insensitive name filter
        #[arg(short, long)]
        search: Option<String>,

        /// Sort order: added, oldest, recent, name, progress
        #[arg(long)]
        sort: Option<SortOrder>,

        /// Maximum number of documents
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Recently opened documents
    Recent {
        /// Maximum number of documents
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one document's metadata
    Show {
        /// Document ID
        id: String,
    },

    /// Write a document's PDF bytes to a file or directory
    Export {
        /// Document ID
        id: String,
        /// Destination file or directory
        dest: PathBuf,
    },

    /// Record reading progress
    Progress {
        /// Document ID
        id: String,
        /// Current page (1-based)
        position: u32,
        /// Total page count, if measured
        #[arg(long)]
        total: Option<u32>,
    },

    /// Move a document to a collection
    Move {
        /// Document ID
        id: String,

        /// Target collection ID
        #[arg(long, conflicts_with = "uncategorized", required_unless_present = "uncategorized")]
        collection: Option<String>,

        /// Remove the document from its collection
        #[arg(long)]
        uncategorized: bool,
    },

    /// Rename a document
    Rename {
        /// Document ID
        id: String,
        /// New display name
        name: String,
    },

    /// Permanently delete a document
    Remove {
        /// Document ID
        id: String,
    },

    /// Manage collections
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Show library status
    Status,

    /// Clear collection references left by interrupted deletes
    Repair,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    /// List collections
    List,

    /// Create a collection
    Create {
        /// Collection name
        name: String,
    },

    /// Delete a collection; its documents become uncategorized
    Remove {
        /// Collection ID
        id: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(ProgressAwareWriter))
        .with(filter)
        .init();

    match &cli.command {
        Commands::Init { force } => return handle_init(cli.config.as_deref(), *force, cli.json).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "pdfshelf", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli.config.as_deref())?;
    let store = LibraryStore::connect(&config).await?;
    let json = cli.json;

    let result = dispatch(&config, &store, cli.command, json).await;
    store.close().await;
    result
}

async fn dispatch(config: &Config, store: &LibraryStore, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Add {
            paths,
            collection,
            name,
        } => {
            let options = AddOptions {
                collection_id: collection,
                name,
                show_progress: !json,
            };
            let report = cmd_add(store, &paths, options).await?;
            emit(json, &report, print_add_report)?;
        }

        Commands::List {
            collection,
            uncategorized,
            search,
            sort,
            limit,
        } => {
            let filter = match (collection, uncategorized) {
                (Some(id), _) => CollectionFilter::Collection(id),
                (None, true) => CollectionFilter::Uncategorized,
                (None, false) => CollectionFilter::All,
            };
            let mut query = DocumentQuery::new()
                .in_collection(filter)
                .sort(match sort {
                    Some(sort) => sort,
                    None => config.default_sort()?,
                });
            if let Some(text) = search {
                query = query.search(text);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            let rows = cmd_list(store, &query).await?;
            emit(json, &rows, |rows| print_documents(rows))?;
        }

        Commands::Recent { limit } => {
            let rows = cmd_recent(store, limit.unwrap_or(config.library.recent_limit)).await?;
            emit(json, &rows, |rows| print_documents(rows))?;
        }

        Commands::Show { id } => {
            let row = cmd_show(store, &id).await?;
            emit(json, &row, print_document)?;
        }

        Commands::Export { id, dest } => {
            let report = cmd_export(store, &id, &dest).await?;
            emit(json, &report, |r| {
                println!("✓ Wrote {} bytes to {}", r.bytes_written, r.path)
            })?;
        }

        Commands::Progress {
            id,
            position,
            total,
        } => {
            let meta = cmd_progress(store, &id, position, total).await?;
            emit(json, &meta, |m| {
                println!("✓ '{}' at page {}", m.name, m.current_position)
            })?;
        }

        Commands::Move {
            id,
            collection,
            uncategorized: _,
        } => {
            let target = match collection {
                Some(cid) => MoveTarget::Collection(cid),
                None => MoveTarget::Uncategorized,
            };
            let meta = cmd_move(store, &id, target).await?;
            emit(json, &meta, |m| match &m.collection_id {
                Some(cid) => println!("✓ Moved '{}' to collection {}", m.name, cid),
                None => println!("✓ Moved '{}' to Uncategorized", m.name),
            })?;
        }

        Commands::Rename { id, name } => {
            let meta = cmd_rename(store, &id, &name).await?;
            emit(json, &meta, |m| println!("✓ Renamed {} to '{}'", m.id, m.name))?;
        }

        Commands::Remove { id } => {
            if !cmd_remove(store, &id).await? {
                return Err(Error::DocumentNotFound(id));
            }
            emit(json, &serde_json::json!({ "removed": id }), |_| {
                println!("✓ Document '{}' removed", id)
            })?;
        }

        Commands::Collections { action } => match action {
            CollectionAction::List => {
                let collections = cmd_list_collections(store).await?;
                emit(json, &collections, |c| print_collections(c))?;
            }
            CollectionAction::Create { name } => {
                let collection = cmd_create_collection(store, &name).await?;
                emit(json, &collection, |c| {
                    println!("✓ Created collection '{}'", c.name);
                    println!("  ID: {}", c.id);
                })?;
            }
            CollectionAction::Remove { id } => {
                let removal = cmd_remove_collection(store, &id).await?;
                emit(json, &removal, |r| {
                    println!("✓ Collection '{}' removed", id);
                    println!("  Documents moved to Uncategorized: {}", r.documents_uncategorized);
                })?;
            }
        },

        Commands::Status => {
            let status = cmd_status(config, store).await?;
            emit(json, &status, print_status)?;
        }

        Commands::Repair => {
            let stats = cmd_repair(store).await?;
            emit(json, &stats, |s| {
                println!("✓ Repaired {} document(s)", s.documents_repaired)
            })?;
        }
    }

    Ok(())
}

/// Print `value` as JSON, or through the human-readable printer
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

async fn handle_init(config: Option<&Path>, force: bool, json: bool) -> Result<()> {
    let config_file = Config::resolve_config_path(config);
    let report = cmd_init(Some(config_file), force).await?;
    emit(json, &report, |r| {
        println!("✓ pdfshelf initialized successfully");
        println!("  Config: {}", r.config_path);
        println!("  Database: {}", r.db_path);
        println!("\nNext steps:");
        println!("  1. Add PDFs: pdfshelf add ~/Documents/papers");
        println!("  2. Browse them: pdfshelf list");
    })
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = Config::resolve_config_path(path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
