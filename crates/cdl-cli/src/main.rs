use cdl_core::{config, logging};

mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    // Only the logging section is needed this early; commands load (and report) the config themselves.
    let log_cfg = config::load_or_init()
        .map(|cfg| cfg.logging)
        .unwrap_or_default();
    if let Err(e) = logging::init(&log_cfg) {
        logging::init_stderr(&log_cfg);
        tracing::warn!("file logging unavailable, using stderr: {e:#}");
    }

    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("cdl error: {:#}", err);
        std::process::exit(1);
    }
}
