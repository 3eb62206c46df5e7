//! `edgecached` daemon entry point: CLI parsing, config loading, logging
//! init, then handing off to the supervisor.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use edgecached::config::Config;
use edgecached::server::supervisor;
use tracing::error;

/// Edge-caching HTTP/1.1 static file server.
#[derive(Parser, Debug)]
#[command(name = "edgecached", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Falls back to built-in defaults
    /// if the file doesn't exist.
    #[arg(default_value = "./edgecached.toml")]
    config: PathBuf,

    /// Force development mode regardless of what the config file says
    /// (disables rate limiting; see the `development_mode` config key).
    #[arg(short, long)]
    dev: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    edgecached::logging::init();

    let config = match Config::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    let config = if cli.dev { config.force_dev_mode() } else { config };

    match supervisor::run(config, cli.config, cli.dev) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "edgecached exited with an error");
            ExitCode::FAILURE
        }
    }
}
