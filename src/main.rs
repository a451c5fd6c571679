use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coffer::cli::{
    handle_audit_command, handle_backup_command, handle_key_command, AuditArgs, BackupCommands,
    KeyCommands,
};
use coffer::config::{paths::CofferPaths, settings::Settings};
use coffer::error::{CofferError, EXIT_FAILURE};

#[derive(Parser)]
#[command(
    name = "coffer",
    version,
    about = "Encrypted backups and key management for a personal wealth tracker",
    long_about = "Coffer keeps the encryption key of a personal wealth tracker, \
                  takes encrypted snapshots of its data store on a schedule, \
                  prunes old ones and restores them after verifying integrity."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Key material management commands
    #[command(subcommand)]
    Keys(KeyCommands),

    /// Backup management commands
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Show recent audit log entries
    Audit(AuditArgs),

    /// Show current configuration and paths
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<CofferError>()
                .map_or(EXIT_FAILURE, CofferError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "coffer=debug" } else { "coffer=warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let paths = CofferPaths::new()?;
    let settings = Settings::load_or_create(&paths)?;

    match cli.command {
        Commands::Keys(cmd) => handle_key_command(&paths, &settings, cmd)?,
        Commands::Backup(cmd) => handle_backup_command(&paths, &settings, cmd)?,
        Commands::Audit(args) => handle_audit_command(&paths, args)?,
        Commands::Config => {
            println!("Coffer Configuration");
            println!("====================");
            println!("Base directory:   {}", paths.base_dir().display());
            println!("Data directory:   {}", paths.data_dir().display());
            println!("Backup directory: {}", paths.backup_dir().display());
            println!("Key backups:      {}", paths.key_backup_dir().display());
            println!("Store file:       {}", paths.store_file(&settings.store_file).display());
            println!();
            println!("Settings:");
            println!("  Scheduled backups kept: {}", settings.retention.scheduled_count);
            println!("  Schedule interval:      {}s", settings.schedule.interval_secs);
            println!(
                "  Expected schema:        v{}",
                settings.migration.expected_schema_version
            );
            println!(
                "  Migration command:      {}",
                settings
                    .migration
                    .command
                    .as_ref()
                    .map_or("none".to_string(), |c| c.join(" "))
            );
        }
    }

    Ok(())
}
