use anyhow::Result;
use clap::Parser;

use phasediff::cli::Args;
use phasediff::config::ExperimentConfig;
use phasediff::report;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ExperimentConfig::load_or_default(&args.config)?;
    let (process, tables) = args.steps();

    if process {
        let dataset = report::process(&config)?;
        log::info!(
            "Dataset: {} observations, {} instruments, {} conditions",
            dataset.len(),
            dataset.instruments().len(),
            dataset.conditions().len()
        );
    }
    if tables {
        report::run(&config)?;
    }
    Ok(())
}
