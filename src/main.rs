//! MySQL Database Sync Tool
//!
//! Dumps a database on the origin, moves it to the target and imports it
//! there, on this machine or over SSH.

// dbsynctool/src/main.rs
mod backup;
mod cleanup;
mod config;
mod errors;
mod exec;
mod logging;
mod restore;
mod sync;
mod transfer;
mod utils;
mod vault;

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use config::{EndpointOverrides, Overrides, SyncConfig};
use errors::SyncError;
use logging::LogConfig;
use sync::SyncOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "db-sync-tool")]
#[command(about = "Synchronize a MySQL database between two systems", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (.json, .yml or .yaml)
    #[arg(short = 'f', long, env = "DB_SYNC_TOOL_CONFIG", help_heading = "Configuration")]
    config_file: Option<PathBuf>,
    /// Also write the log to this file
    #[arg(short = 'l', long, help_heading = "Configuration")]
    log_file: Option<PathBuf>,

    /// Log every command that is run
    #[arg(short, long, help_heading = "Output")]
    verbose: bool,
    /// Only log errors
    #[arg(short, long, help_heading = "Output")]
    mute: bool,
    /// Console output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, help_heading = "Output")]
    output: OutputFormat,

    /// Skip the confirmation prompt before importing
    #[arg(short, long, help_heading = "Execution")]
    yes: bool,
    /// Show what would run without changing anything
    #[arg(long, help_heading = "Execution")]
    dry_run: bool,
    /// Import this dump file instead of dumping the origin
    #[arg(short, long, help_heading = "Execution")]
    import_file: Option<String>,
    /// Use keys from the running SSH agent
    #[arg(long, help_heading = "Execution")]
    ssh_agent: bool,
    /// Swap origin and target of the configuration file
    #[arg(short, long, help_heading = "Execution")]
    reverse: bool,

    /// Name of the dump file, without `.sql`
    #[arg(long, help_heading = "Database Dump")]
    dump_name: Option<String>,
    /// Drop all target tables before importing
    #[arg(long, help_heading = "Database Dump")]
    clear_database: bool,
    /// Copy the transferred dump archive into this directory instead of importing it
    #[arg(short = 'k', long, value_name = "DIR", help_heading = "Database Dump")]
    keep_dump: Option<String>,
    /// Do not check the dump for the mysqldump completion line
    #[arg(long, help_heading = "Database Dump")]
    skip_check_dump: bool,
    /// Comma separated list of tables to dump
    #[arg(short, long, help_heading = "Database Dump")]
    tables: Option<String>,
    /// WHERE condition passed to mysqldump
    #[arg(short, long = "where", help_heading = "Database Dump")]
    where_clause: Option<String>,
    /// Extra options appended to the mysqldump command
    #[arg(long, help_heading = "Database Dump")]
    additional_mysqldump_options: Option<String>,

    #[command(flatten)]
    origin: OriginArgs,
    #[command(flatten)]
    target: TargetArgs,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Origin Client")]
struct OriginArgs {
    /// SSH host of the origin
    #[arg(long)]
    origin_host: Option<String>,
    /// SSH user of the origin
    #[arg(long)]
    origin_user: Option<String>,
    /// SSH port of the origin
    #[arg(long)]
    origin_port: Option<u16>,
    /// SSH private key for the origin
    #[arg(long)]
    origin_key: Option<PathBuf>,
    /// Path of the application on the origin
    #[arg(long)]
    origin_path: Option<String>,
    /// Database name on the origin
    #[arg(long)]
    origin_db_name: Option<String>,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Target Client")]
struct TargetArgs {
    /// SSH host of the target
    #[arg(long)]
    target_host: Option<String>,
    /// SSH user of the target
    #[arg(long)]
    target_user: Option<String>,
    /// SSH port of the target
    #[arg(long)]
    target_port: Option<u16>,
    /// SSH private key for the target
    #[arg(long)]
    target_key: Option<PathBuf>,
    /// Path of the application on the target
    #[arg(long)]
    target_path: Option<String>,
    /// Database name on the target
    #[arg(long)]
    target_db_name: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            verbose: self.verbose,
            mute: self.mute,
            dry_run: self.dry_run,
            yes: self.yes,
            import: self.import_file.clone(),
            dump_name: self.dump_name.clone(),
            clear_database: self.clear_database,
            skip_check_dump: self.skip_check_dump,
            tables: self.tables.clone(),
            where_clause: self.where_clause.clone(),
            additional_mysqldump_options: self.additional_mysqldump_options.clone(),
            ssh_agent: self.ssh_agent,
            log_file: self.log_file.clone(),
            keep_dump: self.keep_dump.clone(),
            reverse: self.reverse,
            origin: EndpointOverrides {
                host: self.origin.origin_host.clone(),
                user: self.origin.origin_user.clone(),
                port: self.origin.origin_port,
                ssh_key: self.origin.origin_key.clone(),
                path: self.origin.origin_path.clone(),
                db_name: self.origin.origin_db_name.clone(),
            },
            target: EndpointOverrides {
                host: self.target.target_host.clone(),
                user: self.target.target_user.clone(),
                port: self.target.target_port,
                ssh_key: self.target.target_key.clone(),
                path: self.target.target_path.clone(),
                db_name: self.target.target_db_name.clone(),
            },
        }
    }
}

/// Main entry point for the sync tool
fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let output = cli.output;

    match run_app(cli) {
        Ok(outcome) => {
            report(&outcome, output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_error(&e, output);
            ExitCode::FAILURE
        }
    }
}

fn run_app(cli: Cli) -> Result<SyncOutcome> {
    let config = SyncConfig::load(cli.config_file.as_deref(), &cli.overrides()).with_context(|| match &cli.config_file {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    logging::init_logging(LogConfig {
        verbose: config.verbose,
        mute: config.mute,
        json: cli.output == OutputFormat::Json,
        log_file: config.log_file.as_deref(),
    })?;
    info!(endpoint = "local", "🚀 Starting database sync");

    let outcome = sync::run_sync_flow(config, &mut confirm_from_stdin).context("Sync process failed")?;
    Ok(outcome)
}

fn report(outcome: &SyncOutcome, output: OutputFormat) {
    let summary = match outcome {
        SyncOutcome::Imported { mode } => format!("Database sync completed ({})", mode),
        SyncOutcome::Dumped { archive } => format!("Database dump saved to {}", archive),
        SyncOutcome::Declined => "Nothing imported".to_string(),
    };
    match output {
        OutputFormat::Json => info!(endpoint = "local", "{}", summary),
        OutputFormat::Text => println!("✅ {}", summary),
    }
}

fn report_error(e: &anyhow::Error, output: OutputFormat) {
    let kind = e.downcast_ref::<SyncError>().map(SyncError::kind).unwrap_or("ERROR");
    match output {
        OutputFormat::Json if tracing::dispatcher::has_been_set() => {
            error!(kind, "{:#}", e);
        }
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "level": "ERROR", "kind": kind, "message": format!("{:#}", e) }));
        }
        OutputFormat::Text => eprintln!("❌ Error: {:#}", e),
    }
}

/// Asks a yes/no question on the terminal. Enter means yes.
fn confirm_from_stdin(prompt: &str) -> errors::Result<bool> {
    use std::io::{Write, stdin, stdout};

    loop {
        print!("{} [Y|n]: ", prompt);
        stdout().flush()?;
        let mut input = String::new();
        if stdin().read_line(&mut input)? == 0 {
            return Ok(false);
        }
        match input.trim().to_ascii_lowercase().as_str() {
            "" | "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please enter y or n."),
        }
    }
}
