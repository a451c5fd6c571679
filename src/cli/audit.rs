//! Audit CLI command
//!
//! Prints the tail of the audit log.

use clap::Args;

use crate::audit::AuditLogger;
use crate::config::paths::CofferPaths;
use crate::error::CofferResult;

/// Arguments for `coffer audit`
#[derive(Args)]
pub struct AuditArgs {
    /// Number of most recent entries to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub count: usize,
}

/// Handle the audit command
pub fn handle_audit_command(paths: &CofferPaths, args: AuditArgs) -> CofferResult<()> {
    let logger = AuditLogger::new(paths.audit_log());
    let entries = logger.read_recent(args.count)?;

    if entries.is_empty() {
        println!("No audit entries in {}.", logger.path().display());
        return Ok(());
    }

    println!("Audit log: {}", logger.path().display());
    println!();
    for entry in &entries {
        println!("{}", entry.format_human_readable());
    }
    Ok(())
}
