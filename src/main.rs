use clap::Parser;
use std::process::exit;

mod cli;
mod config;
mod logging;
mod script_manager;
mod system;

use cli::{error_notice, execute_command, Cli};

fn main() {
    // Parse command line arguments
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // Execute the appropriate command; failures are a one-line notice
    if let Err(e) = execute_command(&cli) {
        eprintln!("{}", error_notice(&e));
        exit(1);
    }
}
