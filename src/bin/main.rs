use std::process;

use clap::Parser;
use tracing::error;

use svman::{config::Settings, logger, supervisor::Supervisor};

/// Command-line interface for svman.
#[derive(Parser)]
#[command(name = "svman", version, author)]
#[command(about = "A lightweight multi-service supervisor", long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "svman.yaml")]
    config: String,

    /// Override the configured log level (1-9, fatal..trace).
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<u8>,
}

fn main() {
    let args = Cli::parse();

    let mut settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("svman: {err}");
            process::exit(1);
        }
    };

    if let Some(level) = args.log_level {
        settings.log.level = Some(level);
    }
    logger::init(&settings.log);

    let mut supervisor = Supervisor::new(settings);
    if let Err(err) = supervisor.run() {
        error!("supervisor exited with error: {err}");
        eprintln!("svman: {err}");
        process::exit(1);
    }
}
