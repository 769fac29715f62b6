//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use osm_parquetizer::cli::{self, CliError};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match cli::run() {
        Ok(()) => {}
        // Clap prints the message and usage banner; exits 2 on bad arguments.
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            eprintln!("osm-parquetizer: {err}");
            std::process::exit(1);
        }
    }
}
