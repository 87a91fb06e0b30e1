//! hwmctl - lifecycle automation for the hardware-management appliance
//!
//! Each subcommand reads one operation's arguments as JSON, converges the
//! appliance or one of its resources, and prints a single JSON result on
//! stdout. Logs go to stderr.

use anyhow::Result;
use clap::Parser;

mod commands;
mod config;
mod logging;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match config::Settings::load(cli.config_path()) {
        Ok(settings) => settings,
        Err(e) => {
            output::print_error(&e);
            std::process::exit(1);
        }
    };
    logging::init(cli.log_format(), &settings.log_level);

    match cli.run(&settings).await {
        Ok(result) => {
            if !output::print(&result)? {
                std::process::exit(1);
            }
        }
        Err(e) => {
            output::print_error(&e);
            std::process::exit(1);
        }
    }

    Ok(())
}
