//! Stackforge CLI — Rust-native stack definition.

use clap::Parser;

fn main() {
    let cli = stackforge::cli::Cli::parse();
    if let Err(e) = stackforge::cli::dispatch(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
