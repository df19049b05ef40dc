//! # vix CLI
//!
//! Command-line interface for Vix.
//!
//! This binary provides human-friendly access to `vix-core`: saved profiles,
//! collection listings and collection migrations between backends.
//! Run `vix --help` for usage information.

mod cli;
pub mod ui;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
