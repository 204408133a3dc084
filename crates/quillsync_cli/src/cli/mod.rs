//! Command-line entry point: parses `--scenario`/`--duration` and hands
//! off to the matching scenario runner.

mod args;
mod replicator;
mod scenarios;

pub use args::{Cli, Scenario};

use clap::Parser;

/// Parse arguments, run the selected scenario, and return whether every
/// instance converged.
pub fn run_cli() -> bool {
    let cli = Cli::parse();
    log::info!("running scenario {:?} (duration budget {}s)", cli.scenario, cli.duration);

    let outcome = scenarios::run(cli.scenario, cli.duration);
    match &outcome {
        Ok(report) => {
            log::info!("{report}");
            report.converged
        }
        Err(err) => {
            log::error!("scenario failed: {err}");
            false
        }
    }
}
