//! Flock database CLI
//!
//! Operator commands against whichever provider the environment selects.

use clap::{Parser, Subcommand};
use flock_persistence::guard::{self, InitializationGuard};
use flock_persistence::{DatabaseFactory, schema};
use serde::Serialize;
use tracing::{error, info};

/// Exit code reported after an interrupt.
const INTERRUPTED: i32 = 130;

#[derive(Debug, Parser)]
#[command(name = "flock-db")]
#[command(about = "Inspect and bootstrap the Flock database", version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "FLOCK_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Print the health report as JSON.
    Health,
    /// Print provider statistics as JSON.
    Stats,
    /// Create any missing tables.
    Migrate,
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("flock_db={level},flock_persistence={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs `command` and returns the process exit code.
async fn run(command: Command, guard: &InitializationGuard) -> anyhow::Result<i32> {
    let factory = DatabaseFactory::global();

    match command {
        Command::Health => {
            if let Err(err) = guard.ensure_connection().await {
                error!(error = %err, "database initialization failed");
            }
            let report = factory.check_database_health().await;
            print_json(&report)?;
            Ok(if report.status.is_available() { 0 } else { 1 })
        }
        Command::Stats => {
            guard.ensure_connection().await?;
            let stats = factory.get_database_stats().await?;
            print_json(&stats)?;
            Ok(0)
        }
        Command::Migrate => {
            let provider = guard.ensure_connection().await?;
            let report = schema::ensure_schema(provider.as_ref()).await?;
            info!(
                created = report.created.len(),
                existing = report.existing.len(),
                missing = report.missing.len(),
                "schema check finished"
            );
            print_json(&report)?;
            Ok(if report.is_complete() { 0 } else { 1 })
        }
    }
}

/// Drives `work` until it finishes or the process is interrupted, then
/// closes the guard's connections before reporting the outcome.
async fn supervise<F>(guard: &InitializationGuard, work: F) -> anyhow::Result<i32>
where
    F: Future<Output = anyhow::Result<i32>>,
{
    let outcome = tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, closing database connections");
            Ok(INTERRUPTED)
        }
    };

    let closed = guard.shutdown().await;
    let code = outcome?;
    closed?;
    Ok(code)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let guard = guard::global();
    let code = supervise(guard, run(cli.command, guard)).await?;
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommand_and_level() {
        let cli = Cli::parse_from(["flock-db", "--log-level", "debug", "migrate"]);
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Command::Migrate));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_failed_command_still_closes_connections() {
        use flock_persistence::DatabaseConfig;

        let guard = InitializationGuard::with_config(DatabaseConfig::sqlite(":memory:"));
        guard.ensure_connection().await.unwrap();
        assert!(guard.is_ready());

        let result = supervise(&guard, async { Err(anyhow::anyhow!("command failed")) }).await;
        assert!(result.is_err());
        assert!(!guard.is_ready());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_successful_command_reports_exit_code() {
        use flock_persistence::DatabaseConfig;

        let guard = InitializationGuard::with_config(DatabaseConfig::sqlite(":memory:"));
        guard.ensure_connection().await.unwrap();

        let code = supervise(&guard, async { Ok(1) }).await.unwrap();
        assert_eq!(code, 1);
        assert!(!guard.is_ready());
    }
}
