// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand CLI - run shell commands concurrently on the cooperative scheduler.

mod commands;
mod help;
mod output;

use std::env;
use std::process;

use tracing_subscriber::EnvFilter;

fn main() {
    output::init();
    init_logging();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        help::print_usage();
        return;
    }

    match args[1].as_str() {
        "run" => {
            let code = commands::run::cmd_run(&args[2..]);
            process::exit(code);
        }
        "help" | "--help" | "-h" => {
            help::print_usage();
        }
        "version" | "--version" | "-V" => {
            println!("strand {}", help::VERSION);
        }
        other => {
            eprintln!("{}: unknown command: {}", output::error_label(), other);
            help::print_usage();
            process::exit(1);
        }
    }
}

/// Diagnostics go to stderr, filtered by `STRAND_LOG`.
fn init_logging() {
    let filter = EnvFilter::try_from_env("STRAND_LOG").unwrap_or_else(|_| EnvFilter::new("error"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
