//! Journal registry command-line tool.
//!
//! Checks journal tables out to an edit surface, checks the edited rows back
//! in, finalizes sessions, and inspects the session ledger and history
//! mirrors.

mod report;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use journals_core::config::{AppConfig, SurfaceKind};
use journals_core::db::Database;
use journals_core::edit_control::{CheckinOutcome, CheckoutOutcome, EditControl};
use journals_core::models::EditStatus;
use journals_core::registry::SchemaRegistry;
use journals_core::surface;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Journal registry command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "journals",
    version,
    about = "Check journal metadata tables out for editing and reconcile them back"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/journals/config.toml"
    )]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./journals.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Lock a table and export it to a new edit surface.
    Checkout {
        /// Table name.
        table: String,
    },

    /// Reconcile the edited rows of a checked-out table.
    Checkin {
        /// Table name.
        table: String,

        /// Delete stored records that no longer appear in the edited rows.
        #[arg(long)]
        delete: bool,

        /// Print the reconciliation report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Finalize an edit session by hand.
    SetStatus {
        /// Edit session ID.
        editid: i64,

        /// Terminal status: completed or failed.
        status: String,
    },

    /// List edit sessions.
    Sessions {
        /// Only sessions of this table.
        #[arg(short, long)]
        table: Option<String>,

        /// Number of results.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show history snapshots of a table.
    History {
        /// Table name.
        table: String,

        /// Only snapshots written by this edit session.
        #[arg(long)]
        editid: Option<i64>,

        /// Number of results.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Write the current snapshot of a table to stdout as CSV.
    Export {
        /// Table name.
        table: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let command = match cli.command {
        Commands::Init { ref output } => {
            init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
            return cmd_init(output);
        }
        Commands::Validate => {
            init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
            return cmd_validate(&cli.config);
        }
        command => command,
    };

    let registry = SchemaRegistry::journals();
    let config = AppConfig::load_and_validate(&cli.config, &registry)
        .context("failed to load configuration file")?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.registry.log_level));
    let db = Arc::new(open_database(&config)?);

    match command {
        Commands::Checkout { table } => cmd_checkout(&config, db, &table),
        Commands::Checkin {
            table,
            delete,
            json,
        } => cmd_checkin(&config, db, &table, delete, json),
        Commands::SetStatus { editid, status } => cmd_set_status(&config, db, editid, &status),
        Commands::Sessions { table, limit } => cmd_sessions(&db, table.as_deref(), limit),
        Commands::History {
            table,
            editid,
            limit,
        } => cmd_history(&db, &registry, &table, editid, limit),
        Commands::Export { table } => cmd_export(&db, &registry, &table),
        Commands::Init { .. } | Commands::Validate => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::new(config.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    tracing::debug!(path = %config.database_path().display(), "database ready");
    Ok(db)
}

fn edit_control(config: &AppConfig, db: Arc<Database>) -> Result<EditControl> {
    let surface = surface::from_config(config).context("failed to open edit surface")?;
    Ok(EditControl::from_config(config, db, surface))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# Journal registry configuration

[registry]
data_dir = "/var/lib/journals"
log_level = "info"
editable_tables = ["master", "names", "idents", "abbrevs", "publisher", "titlehistory"]

[surface]
# "folder" keeps one CSV file per edit session; "memory" keeps nothing.
kind = "folder"
# dir = "/var/lib/journals/sheets"

[reconcile]
# Treat blank text cells as NULL when comparing against existing records.
blank_as_null_on_modify = false
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the data directory and editable tables");
    println!("  2. Validate with: journals validate --config {}", output.display());
    println!("  3. Check a table out: journals --config {} checkout master", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate(&SchemaRegistry::journals()) {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Data directory : {}", config.registry.data_dir.display());
    println!("  Database       : {}", config.database_path().display());
    println!("  Log level      : {}", config.registry.log_level);
    println!("  Editable tables: {}", config.registry.editable_tables.join(", "));
    match config.surface.kind {
        SurfaceKind::Folder => {
            println!("  Edit surface   : folder ({})", config.surface_dir().display())
        }
        SurfaceKind::Memory => println!("  Edit surface   : memory"),
    }
    println!(
        "  Blank as NULL  : {}",
        if config.reconcile.blank_as_null_on_modify {
            "on modify and create"
        } else {
            "on create only"
        }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_checkout(config: &AppConfig, db: Arc<Database>, table: &str) -> Result<()> {
    let control = edit_control(config, db)?;
    let outcome = control
        .checkout(table)
        .with_context(|| format!("failed to check out '{}'", table))?;

    let session = outcome.session();
    match &outcome {
        CheckoutOutcome::Created { rows, .. } => println!(
            "{}",
            style::success(&format!(
                "Checked out '{}' as edit {} ({} rows)",
                table, session.editid, rows
            ))
        ),
        CheckoutOutcome::Reused { .. } => println!(
            "{}",
            style::warn(&format!(
                "'{}' is already checked out as edit {} since {}",
                table,
                session.editid,
                session.created.format("%Y-%m-%d %H:%M:%S")
            ))
        ),
    }

    match config.surface.kind {
        SurfaceKind::Folder => println!(
            "  Edit surface: {}",
            config
                .surface_dir()
                .join(format!("{}.csv", session.surface_id))
                .display()
        ),
        SurfaceKind::Memory => println!("  Edit surface: {}", session.surface_id),
    }

    Ok(())
}

fn cmd_checkin(
    config: &AppConfig,
    db: Arc<Database>,
    table: &str,
    delete: bool,
    json: bool,
) -> Result<()> {
    let control = edit_control(config, db)?;
    let lookup = control
        .master_lookup()
        .context("failed to read bibstem to masterid lookup")?;

    let outcome = control
        .checkin(table, &lookup, delete)
        .with_context(|| format!("failed to check in '{}'", table))?;

    match outcome {
        CheckinOutcome::NotCheckedOut => {
            println!("{}", style::warn(&format!("'{}' is not checked out", table)));
            Ok(())
        }
        CheckinOutcome::Reconciled(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report::print_report(&report);
            }
            if report.counts.failure > 0 {
                anyhow::bail!(
                    "{} row(s) of '{}' could not be reconciled",
                    report.counts.failure,
                    table
                );
            }
            Ok(())
        }
    }
}

fn cmd_set_status(config: &AppConfig, db: Arc<Database>, editid: i64, status: &str) -> Result<()> {
    let status = EditStatus::parse(status)?;
    let control = edit_control(config, db)?;
    let session = control
        .set_status(editid, status)
        .with_context(|| format!("failed to set status of edit {}", editid))?;

    println!(
        "{}",
        style::success(&format!(
            "Edit {} ('{}') marked {}",
            session.editid, session.tablename, session.status
        ))
    );
    Ok(())
}

fn cmd_sessions(db: &Database, table: Option<&str>, limit: u32) -> Result<()> {
    let sessions = db
        .list_sessions(table, limit)
        .context("failed to list edit sessions")?;

    if sessions.is_empty() {
        println!("No edit sessions found.");
        return Ok(());
    }

    report::print_sessions(&sessions);
    Ok(())
}

fn cmd_history(
    db: &Database,
    registry: &SchemaRegistry,
    table: &str,
    editid: Option<i64>,
    limit: u32,
) -> Result<()> {
    let schema = registry
        .get(table)
        .ok_or_else(|| anyhow::anyhow!("unknown table '{}'", table))?;
    let entries = db
        .list_history(schema, editid, limit)
        .context("failed to list history")?;

    if entries.is_empty() {
        println!("No history found for '{}'.", table);
        return Ok(());
    }

    report::print_history(schema, &entries);
    Ok(())
}

fn cmd_export(db: &Database, registry: &SchemaRegistry, table: &str) -> Result<()> {
    if !registry.contains(table) {
        anyhow::bail!("unknown table '{}'", table);
    }
    let snapshot = db
        .export_table(registry, table)
        .with_context(|| format!("failed to export '{}'", table))?;

    let mut writer = csv::Writer::from_writer(std::io::stdout().lock());
    writer.write_record(&snapshot.header)?;
    for row in &snapshot.rows {
        writer.write_record(snapshot.header.iter().map(|h| row.get(h).unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}
