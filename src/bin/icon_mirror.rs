use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use icon_mirror::app::{App, RunOptions};
use icon_mirror::client::HttpArchiveClient;
use icon_mirror::config::ConfigLoader;
use icon_mirror::domain::ReferenceDate;
use icon_mirror::error::MirrorError;
use icon_mirror::output::{JsonOutput, TextOutput};

#[derive(Parser)]
#[command(name = "icon-mirror")]
#[command(about = "Incrementally mirror DWD ICON open-data into a local directory or S3 bucket")]
#[command(version, author)]
struct Cli {
    /// YAML config file (CONFIG_PATH takes precedence)
    #[arg(long)]
    config: Option<String>,

    /// Reference date as YYYYMMDD; defaults to today (UTC)
    #[arg(long)]
    date: Option<String>,

    /// Stop at the first dataset that fails
    #[arg(long)]
    strict: bool,

    /// Save incremental state after every downloaded file
    #[arg(long)]
    checkpoint: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::from(1),
        Ok(false) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<MirrorError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &MirrorError) -> u8 {
    match error {
        MirrorError::ConfigRead(_)
        | MirrorError::ConfigParse(_)
        | MirrorError::InvalidConfig(_)
        | MirrorError::InvalidDataset(_)
        | MirrorError::UnknownStorage(_)
        | MirrorError::InvalidDate(_)
        | MirrorError::InvalidRun(_)
        | MirrorError::Template(_) => 2,
        _ => 1,
    }
}

/// Returns whether any dataset failed.
fn run() -> miette::Result<bool> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let date = match cli.date.as_deref() {
        Some(value) => value.parse::<ReferenceDate>()?,
        None => ReferenceDate::today(),
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let storage = config.storage.open()?;
    let client = HttpArchiveClient::with_timeout(config.timeout)?;
    let app = App::new(storage, client);

    let options = RunOptions {
        strict: cli.strict,
        checkpoint: cli.checkpoint,
    };
    let summary = app.run(&config.datasets, date, options)?;

    if cli.json {
        JsonOutput::print_summary(&summary).into_diagnostic()?;
    } else {
        TextOutput::print_summary(&summary).into_diagnostic()?;
    }
    if summary.has_errors {
        tracing::error!(
            "{}",
            MirrorError::DatasetsFailed {
                failed: summary.failed(),
                total: summary.datasets.len(),
            }
        );
    }
    Ok(summary.has_errors)
}
