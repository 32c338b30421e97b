//! # roamload entry point
//!
//! ```text
//! main()
//!   ├─> parse arguments (clap)
//!   ├─> load .env, start the run log
//!   ├─> validate configuration
//!   └─> current-thread Tokio runtime
//!         ├─> connect to the warehouse
//!         ├─> stage every export, moving each to processed/
//!         └─> promote staging into the fact table
//! ```
//!
//! Exit codes: 0 clean run, 1 failed run, 3 out of memory (nothing
//! promoted), 4 promotion failed (staging kept).

#![warn(clippy::all, rust_2018_idioms)]

mod cli;

use clap::Parser as _;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    match cli::run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

// Errors before the run log exists can only go to the terminal.
#[expect(clippy::print_stderr)]
fn report(err: &anyhow::Error) {
    eprintln!("Error: {err:#}");
}
