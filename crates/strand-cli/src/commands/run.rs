// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `strand run`: each shell command becomes a scheduler task suspended on
//! its child process. At most `-j` children run at once; new ones start as
//! earlier ones exit.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::process::Stdio;
use std::rc::Rc;
use std::time::{Duration, Instant};

use strand_rt::{
    Completion, Finished, ProcessSource, Scheduler, SchedulerConfig, SubmitOptions, TaskId,
    TaskState,
};

use crate::{help, output};

const DEFAULT_JOBS: usize = 3;

#[derive(Debug, Default, PartialEq)]
pub struct RunArgs {
    pub jobs: Option<usize>,
    pub timeout: Option<Duration>,
    pub quiet: bool,
    pub file: Option<String>,
    pub commands: Vec<String>,
}

pub fn parse_args(args: &[String]) -> Result<RunArgs, String> {
    let mut parsed = RunArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-j" | "--jobs" => {
                let value = iter.next().ok_or("-j needs a value")?;
                let jobs: usize = value
                    .parse()
                    .map_err(|_| format!("invalid job count '{}'", value))?;
                if jobs == 0 {
                    return Err("job count must be at least 1".to_string());
                }
                parsed.jobs = Some(jobs);
            }
            "-t" | "--timeout" => {
                let value = iter.next().ok_or("-t needs a value")?;
                let secs: f64 = value
                    .parse()
                    .map_err(|_| format!("invalid timeout '{}'", value))?;
                if !secs.is_finite() || secs <= 0.0 {
                    return Err(format!("timeout must be positive, got '{}'", value));
                }
                let timeout = Duration::try_from_secs_f64(secs)
                    .map_err(|_| format!("invalid timeout '{}'", value))?;
                parsed.timeout = Some(timeout);
            }
            "-f" | "--file" => {
                let value = iter.next().ok_or("-f needs a file")?;
                parsed.file = Some(value.clone());
            }
            "-q" | "--quiet" => parsed.quiet = true,
            "--" => {
                parsed.commands.extend(iter.by_ref().cloned());
                break;
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option '{}'", flag));
            }
            cmd => parsed.commands.push(cmd.to_string()),
        }
    }

    Ok(parsed)
}

/// One command per line; blank lines and `#` comments are skipped.
pub fn read_command_file(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Returns the process exit code.
pub fn cmd_run(args: &[String]) -> i32 {
    let mut run_args = match parse_args(args) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{}: {}", output::error_label(), msg);
            help::print_run_usage();
            return 1;
        }
    };

    if let Some(path) = &run_args.file {
        match fs::read_to_string(path) {
            Ok(contents) => run_args.commands.extend(read_command_file(&contents)),
            Err(e) => {
                eprintln!("{}: reading {}: {}", output::error_label(), path, e);
                return 1;
            }
        }
    }

    if run_args.commands.is_empty() {
        eprintln!("{}: no commands given", output::error_label());
        help::print_run_usage();
        return 1;
    }

    let mut config = match SchedulerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", output::error_label(), e);
            return 1;
        }
    };
    match run_args.jobs {
        Some(jobs) => config = config.with_max_concurrent(jobs),
        None if config.max_concurrent.is_none() => {
            config = config.with_max_concurrent(DEFAULT_JOBS)
        }
        None => {}
    }

    match run_commands(config, &run_args) {
        Ok(failed) if failed == 0 => 0,
        Ok(_) => 1,
        Err(e) => {
            eprintln!("{}: {}", output::error_label(), e);
            1
        }
    }
}

/// Run every command to completion, printing a line per command as it
/// finishes. Returns the number of failed commands.
fn run_commands(config: SchedulerConfig, run_args: &RunArgs) -> Result<usize, strand_rt::Error> {
    let started_at = Instant::now();
    let mut sched: Scheduler<i32> = Scheduler::new(config);

    // Filled in by each task when it actually starts, not when queued.
    let starts: Rc<RefCell<HashMap<TaskId, Instant>>> = Rc::default();

    for line in &run_args.commands {
        let mut options = SubmitOptions::new(line.clone());
        if let Some(timeout) = run_args.timeout {
            options = options.with_timeout(timeout);
        }
        let line = line.clone();
        let quiet = run_args.quiet;
        let starts = starts.clone();
        sched.submit_with(options, move |cx| async move {
            starts.borrow_mut().insert(cx.id(), Instant::now());
            let source = if quiet {
                ProcessSource::shell_with(&line, Stdio::null(), Stdio::null())?
            } else {
                ProcessSource::shell(&line)?
            };
            let completion = cx.suspend(source).await?;
            Ok(match completion {
                Completion::Exited { code } => code,
                _ => 0,
            })
        });
    }

    let total = run_args.commands.len();
    let mut passed = 0;
    let mut failed = 0;

    loop {
        let report = sched.run_until_completions(1)?;
        for finished in &report.finished {
            let elapsed = starts
                .borrow()
                .get(&finished.id)
                .map(|t| t.elapsed())
                .unwrap_or_default();
            print_finished(finished, elapsed);
            if finished.state == TaskState::Completed {
                passed += 1;
            } else {
                failed += 1;
            }
        }
        if sched.is_idle() {
            break;
        }
    }

    println!("{}", output::separator(40));
    println!(
        "{} command{} processed in {:.2} seconds: {}, {}",
        total,
        if total == 1 { "" } else { "s" },
        started_at.elapsed().as_secs_f64(),
        output::passed_count(passed),
        output::failed_count(failed)
    );

    Ok(failed)
}

fn print_finished(finished: &Finished, elapsed: Duration) {
    match &finished.error {
        None => println!(
            "{} {} {}",
            output::status_pass(),
            finished.name,
            output::duration(elapsed.as_secs_f64())
        ),
        Some(err) => println!(
            "{} {} {} {}",
            output::status_fail(),
            finished.name,
            output::duration(elapsed.as_secs_f64()),
            output::failure_reason(&err.to_string())
        ),
    }
}
