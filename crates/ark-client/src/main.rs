//! The binary entry point for the ark client.

mod app;

use ark_config::{CliArgs, Config};
use clap::Parser;

fn main() {
    let args = CliArgs::parse();

    let config_dir = match args.config.clone().map_or_else(Config::default_dir, Ok) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to resolve config directory: {e}");
            std::process::exit(1);
        }
    };

    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_dir.display());
            std::process::exit(1);
        }
    };
    config.apply_cli_overrides(&args);

    let log_dir = config.debug.log_to_file.then(|| config_dir.join("logs"));
    ark_log::init_logging(log_dir.as_deref(), Some(&config));

    match app::run(&config.network, args.ping) {
        Ok(stats) => {
            tracing::info!(
                "Session ended after {} ticks, {} frames",
                stats.ticks,
                stats.frames
            );
        }
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }
}
