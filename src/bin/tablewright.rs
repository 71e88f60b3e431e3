//! tablewright: schema management CLI
//!
//! # Usage
//!
//! ```bash
//! # Create a table from a JSON definition
//! tablewright create seals.json
//!
//! # Preview a revision without touching the database
//! tablewright plan <TABLE_ID> seals.v2.json
//!
//! # Undo a migration
//! tablewright revert 20261019093400123456_update_seals
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tablewright::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tablewright")]
#[command(version)]
#[command(about = "Runtime schema management with reversible migrations", long_about = None)]
#[command(after_help = "EXAMPLES:
    tablewright create seals.json
    tablewright show <TABLE_ID> > seals.json
    tablewright update <TABLE_ID> seals.json
    tablewright revert <MIGRATION>")]
struct Cli {
    /// Config file (default: ./tablewright.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, env = "TABLEWRIGHT_DATABASE_URL")]
    database_url: Option<String>,

    /// Migrations directory
    #[arg(long)]
    migrations_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table from a JSON definition
    Create { file: PathBuf },
    /// Revise a table from a JSON definition
    Update { table_id: String, file: PathBuf },
    /// Show the operations an update would run, without running them
    Plan { table_id: String, file: PathBuf },
    /// Drop a table
    Drop { table_id: String },
    /// Apply a persisted migration that is not applied
    Apply { migration: String },
    /// Revert an applied migration
    Revert { migration: String },
    /// Print a table definition as JSON
    Show { table_id: String },
    /// List tables in the catalog
    Tables,
    /// List persisted migrations and their state
    Migrations,
    /// List known column types
    Types,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tablewright=debug" } else { "tablewright=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let registry = TypeRegistry::builtin();

    if let Commands::Types = cli.command {
        for name in registry.names() {
            if let Some(info) = registry.get(name) {
                let codec = if info.text_codec { "json text" } else { "" };
                println!("{:10} {:18} {}", name.cyan(), info.sql_type, codec.dimmed());
            }
        }
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(dir) = cli.migrations_dir {
        config.migrations_dir = dir;
    }

    let store = SqlStore::connect(&config.database_url, config.max_connections, registry.clone())
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    let engine = SchemaEngine::new(store, registry, MigrationDir::new(&config.migrations_dir));

    match cli.command {
        Commands::Create { file } => {
            let mig = engine.create_table(read_def(&file)?).await?;
            print_migration(&mig, "Created");
        }
        Commands::Update { table_id, file } => {
            let mig = engine.update_table(&table_id, read_def(&file)?).await?;
            print_migration(&mig, "Updated");
        }
        Commands::Plan { table_id, file } => {
            let mig = engine.plan_update(&table_id, read_def(&file)?).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&mig)?),
                OutputFormat::Table => {
                    let state = engine.unit_state(&mig).await?;
                    println!("{} {}", state_label(state), mig.name.cyan());
                    print_operations(&mig);
                }
            }
        }
        Commands::Drop { table_id } => {
            let mig = engine.drop_table(&table_id).await?;
            print_migration(&mig, "Dropped");
        }
        Commands::Apply { migration } => {
            let mig = engine.apply(&migration).await?;
            print_migration(&mig, "Applied");
        }
        Commands::Revert { migration } => {
            let mig = engine.revert(&migration).await?;
            println!("{} Reverted {}", "✓".green(), mig.name.cyan());
        }
        Commands::Show { table_id } => {
            let table = engine.table(&table_id).await?;
            println!("{}", serde_json::to_string_pretty(&table.to_def())?);
        }
        Commands::Tables => {
            let tables = engine.tables().await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tables)?),
                OutputFormat::Table => print_tables(&tables),
            }
        }
        Commands::Migrations => {
            for name in engine.migrations().names().await? {
                let state = engine.state(&name).await?;
                println!("{:9} {}", state_label(state), name);
            }
        }
        Commands::Types => unreachable!(), // Handled above
    }

    Ok(())
}

fn read_def(path: &Path) -> Result<TableDef> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn state_label(state: MigrationState) -> ColoredString {
    match state {
        MigrationState::Applied => "applied".green(),
        MigrationState::Persisted => "persisted".yellow(),
        MigrationState::Pending => "pending".dimmed(),
    }
}

fn print_migration(mig: &Migration, verb: &str) {
    println!("{} {} {}", "✓".green(), verb, mig.name.cyan());
    print_operations(mig);
}

fn print_operations(mig: &Migration) {
    println!("  {}", "up:".dimmed());
    for op in &mig.up {
        println!("    • {}", op.to_string().white());
    }
    println!("  {}", "down:".dimmed());
    for op in &mig.down {
        println!("    • {}", op.to_string().dimmed());
    }
}

fn print_tables(tables: &[Table]) {
    if tables.is_empty() {
        println!("{}", "(no tables)".dimmed());
        return;
    }

    let width = tables.iter().map(|t| t.name.len()).max().unwrap_or(4).max(4);
    println!(
        "{} │ {}",
        format!("{:width$}", "name", width = width).white().bold(),
        "id".white().bold()
    );
    println!("{}", format!("{}─┼─{}", "─".repeat(width), "─".repeat(32)).dimmed());
    for table in tables {
        println!("{:width$} │ {}", table.name, table.id, width = width);
        let cols: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.data_type))
            .collect();
        println!("{:width$} │   {}", "", cols.join(", ").dimmed(), width = width);
    }

    println!();
    println!("{} table(s)", tables.len().to_string().cyan());
}
