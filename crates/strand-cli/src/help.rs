// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Help text for CLI commands.

use crate::output;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn print_usage() {
    println!(
        "{} {} - run shell commands through a cooperative scheduler",
        output::title("strand"),
        output::version(VERSION)
    );
    println!();
    println!(
        "{}: {} {} {}",
        output::section_header("Usage"),
        output::command("strand"),
        output::arg("<command>"),
        output::arg("[args]")
    );
    println!();
    println!("{}", output::section_header("Commands:"));
    println!(
        "  {} {}   Run commands concurrently, N at a time",
        output::command("run"),
        output::arg("[options] <cmd>...")
    );
    println!("  {}                      Show this help", output::command("help"));
    println!("  {}                   Show version", output::command("version"));
    println!();
    println!("{}", output::section_header("Run options:"));
    println!("  {} {}     Commands in flight at once (default 3)", output::arg("-j"), output::arg("<N>"));
    println!("  {} {}  Fail a command still running after SECS", output::arg("-t"), output::arg("<SECS>"));
    println!("  {} {}  Read commands from FILE, one per line", output::arg("-f"), output::arg("<FILE>"));
    println!("  {}         Discard command output", output::arg("-q"));
    println!();
    println!("{}", output::section_header("Environment:"));
    println!("  {}   Log filter (e.g. strand_rt=debug)", output::arg("STRAND_LOG"));
    println!("  {}   Scheduler tuning (MAX_CONCURRENT, TASK_TIMEOUT_MS, ...)", output::arg("STRAND_*"));
}

pub fn print_run_usage() {
    println!(
        "{}: {} {} {} {} {} {} {}",
        output::section_header("Usage"),
        output::command("strand run"),
        output::arg("[-j N]"),
        output::arg("[-t SECS]"),
        output::arg("[-q]"),
        output::arg("[-f FILE]"),
        output::arg("[--]"),
        output::arg("<cmd>...")
    );
}
