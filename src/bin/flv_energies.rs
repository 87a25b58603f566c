use std::num::NonZeroUsize;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use flavour_energies::calculator::CommandCalculator;
use flavour_energies::config::{ConfigLoader, DEFAULT_CALCULATOR, RunConfig, parse_workers};
use flavour_energies::error::FlavourError;
use flavour_energies::finalizer::Finalizer;
use flavour_energies::output::{ConsoleOutput, JsonOutput, OutputMode};
use flavour_energies::store::Store;

#[derive(Parser)]
#[command(name = "flv-energies")]
#[command(about = "Compute energies for pending flavour batches and merge them into result stores")]
#[command(version, author)]
struct Cli {
    /// Directory holding the pending FLV_* batches
    staging_root: Utf8PathBuf,

    /// Directory holding the finalized per-flavour stores
    results_root: Utf8PathBuf,

    /// Number of parallel workers handed to the energy calculator
    #[arg(value_parser = parse_workers)]
    workers: NonZeroUsize,

    /// JSON file overriding the built-in calculation settings
    #[arg(long)]
    settings: Option<Utf8PathBuf>,

    /// Energy calculator program, looked up on PATH unless given as a path
    #[arg(long, default_value = DEFAULT_CALCULATOR)]
    calculator: String,

    /// Print a JSON report instead of progress lines
    #[arg(long)]
    json: bool,

    /// Show the create/merge plan without computing or writing anything
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<FlavourError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FlavourError) -> u8 {
    match error {
        FlavourError::InvalidWorkers(_)
        | FlavourError::InvalidBatchName(_)
        | FlavourError::ConfigRead(_)
        | FlavourError::ConfigParse(_)
        | FlavourError::DuplicateCategory { .. } => 2,
        FlavourError::ConfigMismatch { .. } => 3,
        FlavourError::MissingSidecar { .. } | FlavourError::AmbiguousSidecar { .. } => 4,
        FlavourError::FilesystemConflict(_) | FlavourError::PartialRelocation { .. } => 5,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    let config = RunConfig {
        settings: ConfigLoader::resolve(cli.settings.as_deref())?,
        staging_root: cli.staging_root,
        results_root: cli.results_root,
        workers: cli.workers,
        calculator: cli.calculator,
    };
    tracing::debug!(?config, "resolved run configuration");

    let store = Store::new(config.staging_root, config.results_root);
    let calculator = CommandCalculator::new(&config.calculator);
    let finalizer = Finalizer::new(store, config.settings, config.workers, calculator);

    match (output_mode, cli.dry_run) {
        (OutputMode::Console, false) => {
            println!("Calculating energies ...");
            let report = finalizer.run(&ConsoleOutput)?;
            ConsoleOutput::print_report(&report).into_diagnostic()?;
        }
        (OutputMode::Console, true) => {
            finalizer.plan(&ConsoleOutput)?;
        }
        (OutputMode::Json, false) => {
            let report = finalizer.run(&JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        (OutputMode::Json, true) => {
            let plan = finalizer.plan(&JsonOutput)?;
            JsonOutput::print_plan(&plan).into_diagnostic()?;
        }
    }
    Ok(())
}
