use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use ecmwf_prep::{
    config::Config, logging::init_logging, nc_utils::NcDatasetIo, pipeline::run_from_config,
};
use error_stack::ResultExt;

fn main() -> ExitCode {
    let clargs = Cli::parse();
    if let Err(e) = init_logging(clargs.verbosity.log_level_filter()) {
        eprintln!("WARNING: {e}");
    }

    match driver(clargs) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ecmwf_clean did not complete successfully:\n{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn driver(clargs: Cli) -> error_stack::Result<(), CliError> {
    let config = Config::from_file(&clargs.config)
        .change_context(CliError::ReadingConfig)
        .attach_printable_lazy(|| format!("config file was {}", clargs.config.display()))?;

    // Months that fail are reported in the run summary but do not fail the run.
    run_from_config(&config, &NcDatasetIo, &NcDatasetIo).change_context(CliError::Running)?;
    Ok(())
}

/// Merge the monthly ECMWF ERA5 downloads and split them into daily netCDF files.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// Path to the YAML (or .toml) configuration file.
    config: PathBuf,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("An error occurred while reading the configuration")]
    ReadingConfig,
    #[error("An error occurred while preparing the run")]
    Running,
}
