/// Version injected at compile time via CALICO_UPGRADE_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("CALICO_UPGRADE_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

use anyhow::{Context, Result};
use calico_upgrade::config::{self, DEFAULT_CONFIG_PATH_V1, DEFAULT_CONFIG_PATH_V3};
use calico_upgrade::report::render;
use calico_upgrade::{run_abort, run_migration, run_validation, MigrationReport, MigrationResult, RunOptions};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Migrate Calico v1 data to the v3 format
#[derive(Parser, Debug)]
#[command(name = "calico-upgrade", version = VERSION, about, long_about = None)]
struct Cli {
    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate that the v1 data converts cleanly, without writing anything
    Validate(RunArgs),
    /// Pause Calico networking and migrate the v1 data to v3
    Start(RunArgs),
    /// Resume Calico networking after a failed migration
    Abort(ConnectArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Validate(_) => "validate",
            Command::Start(_) => "start",
            Command::Abort(_) => "abort",
        }
    }
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Connection configuration (YAML or JSON) for the Calico v3 API
    #[arg(long, default_value = DEFAULT_CONFIG_PATH_V3)]
    apiconfigv3: PathBuf,

    /// Connection configuration (YAML or JSON) for the Calico v1 API
    #[arg(long, default_value = DEFAULT_CONFIG_PATH_V1)]
    apiconfigv1: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    connect: ConnectArgs,

    /// Directory the reports are written to [default: ./calico-upgrade-report]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Ignore existing v3 data; common resources are overwritten, others left alone
    #[arg(long)]
    ignore_v3_data: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

/// Log to a file for the lifetime of one subcommand
fn setup_logging(level: LogLevel, command: &str) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Unable to open log file {:?}: {}", log_path, err);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(command, "calico-upgrade {} {} (log level {:?})", VERSION, command, level);
    tracing::debug!("Logging to {:?}", log_path);

    Some(guard)
}

fn log_file_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("calico-upgrade").join("calico-upgrade.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".calico-upgrade").join("calico-upgrade.log");
    }
    PathBuf::from("calico-upgrade.log")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _log_guard = setup_logging(cli.log_level, cli.command.name());

    let result = match cli.command {
        Command::Validate(args) => validate(args).await?,
        Command::Start(args) => start(args).await?,
        Command::Abort(args) => abort(args).await?,
    };

    Ok(if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_final_message(message: &str) {
    println!("\n{}", message);
}

/// Make sure the report directory exists before touching any datastore
fn ensure_output_dir(args: &RunArgs) -> Result<PathBuf> {
    let dir = args.output_dir.clone().unwrap_or_else(config::default_output_dir);
    std::fs::create_dir_all(&dir).with_context(|| format!("Unable to create report directory {:?}", dir))?;
    Ok(dir)
}

/// Print the summary and write the report files
///
/// Returns false when the files could not be written. That failure is
/// printed and logged but never ends the command.
fn print_and_write_report(dir: &Path, report: &MigrationReport) -> bool {
    println!("\n{}", render::summarize(report));
    match render::write_report(report, dir) {
        Ok(written) => {
            if !written.is_empty() {
                println!("\nReports written to {}", dir.display());
            }
            true
        }
        Err(err) => {
            tracing::error!("Unable to write reports to {:?}: {:#}", dir, err);
            eprintln!("\nUnable to write reports to {}: {:#}", dir.display(), err);
            false
        }
    }
}

/// What the operator must do next after a failed migration
fn recovery_hint(result: MigrationResult) -> Option<&'static str> {
    match result {
        MigrationResult::FailNeedsRetry => Some("Please retry the command."),
        MigrationResult::FailNeedsAbort => {
            Some("Please run the `calico-upgrade abort` command to ensure Calico networking is unpaused.")
        }
        MigrationResult::Ok | MigrationResult::Fail => None,
    }
}

async fn validate(args: RunArgs) -> Result<MigrationResult> {
    let output = ensure_output_dir(&args)?;

    let datastore = match config::load_clients(&args.connect.apiconfigv3, &args.connect.apiconfigv1).await {
        Ok(datastore) => datastore,
        Err(err) => {
            print_final_message(&format!(
                "Failed to validate v1 to v3 conversion.\nError accessing the Calico API: {:#}",
                err
            ));
            return Ok(MigrationResult::Fail);
        }
    };

    let options = RunOptions {
        ignore_existing_v3: args.ignore_v3_data,
        display_status: true,
    };
    let (report, result) = run_validation(&datastore, &options).await;

    match &report {
        Some(report) if result.is_ok() => {
            print_final_message(
                "Successfully validated v1 to v3 conversion.\nSee reports below for details of the conversion.",
            );
            print_and_write_report(&output, report);
        }
        Some(report) if report.has_errors() => {
            print_final_message(
                "Failed to validate v1 to v3 conversion.\nSee reports below for details of any conversion errors.",
            );
            print_and_write_report(&output, report);
        }
        _ => print_final_message("Failed to validate v1 to v3 conversion.\nSee previous messages for details."),
    }

    Ok(result)
}

async fn start(args: RunArgs) -> Result<MigrationResult> {
    let output = ensure_output_dir(&args)?;

    let datastore = match config::load_clients(&args.connect.apiconfigv3, &args.connect.apiconfigv1).await {
        Ok(datastore) => datastore,
        Err(err) => {
            print_final_message(&format!("Failed to access the Calico API: {:#}\nExiting.", err));
            return Ok(MigrationResult::Fail);
        }
    };

    let options = RunOptions {
        ignore_existing_v3: args.ignore_v3_data,
        display_status: true,
    };
    let (report, result) = run_migration(&datastore, &options).await;

    match &report {
        Some(report) if result.is_ok() => {
            print_final_message(
                "Successfully migrated Calico v1 data to v3 format.\n\
                 Follow the remaining upgrade instructions to complete the upgrade.",
            );
            print_and_write_report(&output, report);
        }
        Some(report) if report.has_errors() => {
            print_final_message(
                "Failed to migrate Calico v1 data to v3 format.\nSee reports below for details of any conversion errors.",
            );
            print_and_write_report(&output, report);
        }
        _ => print_final_message("Failed to migrate Calico v1 data to v3 format.\nSee previous messages for details."),
    }

    if let Some(hint) = recovery_hint(result) {
        println!("\n\n{}", hint);
    }

    Ok(result)
}

async fn abort(args: ConnectArgs) -> Result<MigrationResult> {
    let datastore = match config::load_clients(&args.apiconfigv3, &args.apiconfigv1).await {
        Ok(datastore) => datastore,
        Err(err) => {
            print_final_message(&format!("Failed to access the Calico API: {:#}\nExiting.", err));
            return Ok(MigrationResult::Fail);
        }
    };

    let options = RunOptions {
        ignore_existing_v3: false,
        display_status: true,
    };
    let result = run_abort(&datastore, &options).await;

    if result.is_ok() {
        print_final_message("Successfully aborted the upgrade. Calico networking has been resumed.");
    } else {
        print_final_message("Failed to abort the upgrade.\nSee previous messages for details.");
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calico_upgrade::error::ConversionError;
    use calico_upgrade::report::{ConversionOutcome, LegacySource, ReportBuilder};
    use calico_upgrade::resource::LegacyKind;

    fn failed_report() -> MigrationReport {
        let mut builder = ReportBuilder::new();
        builder.record(ConversionOutcome::failed(
            LegacySource {
                kind: LegacyKind::IpPool,
                key: "/calico/v1/ipam/v4/pool/10.0.0.0-16".into(),
                name: "10.0.0.0/16".into(),
            },
            ConversionError::missing("cidr"),
        ));
        builder.finalize()
    }

    #[test]
    fn test_recovery_hint_per_result() {
        assert!(recovery_hint(MigrationResult::FailNeedsRetry).is_some_and(|h| h.contains("retry")));
        assert!(recovery_hint(MigrationResult::FailNeedsAbort).is_some_and(|h| h.contains("calico-upgrade abort")));
        assert_eq!(recovery_hint(MigrationResult::Ok), None);
        assert_eq!(recovery_hint(MigrationResult::Fail), None);
    }

    #[test]
    fn test_unwritable_report_dir_is_not_fatal() {
        // A regular file where the directory should be
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(!print_and_write_report(file.path(), &failed_report()));
    }

    #[test]
    fn test_report_written_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(print_and_write_report(dir.path(), &failed_report()));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_some());
    }

    #[test]
    fn test_command_names() {
        let cli = Cli::parse_from(["calico-upgrade", "start", "--ignore-v3-data"]);
        assert_eq!(cli.command.name(), "start");
        let cli = Cli::parse_from(["calico-upgrade", "--log-level", "debug", "abort"]);
        assert_eq!(cli.command.name(), "abort");
    }
}
