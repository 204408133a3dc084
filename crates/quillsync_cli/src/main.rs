//! Scenario runner for quillsync_core: drives named sloppy-sync
//! convergence workloads against in-memory, fault-injecting instances and
//! exits non-zero if any of them fail to converge.

mod cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if !cli::run_cli() {
        std::process::exit(1);
    }
}
