#![warn(missing_docs)]
//! Timebox CLI Library
//!
//! Command-line harness for test binaries. Build a [`TestModule`] in a
//! closure and hand it to [`run`]; the harness parses flags, merges
//! `timebox.toml`, runs the selected sets in isolated workers (or threads)
//! and prints the results.
//!
//! # Example
//!
//! ```ignore
//! fn main() {
//!     if let Err(e) = timebox_cli::run(build_module) {
//!         eprintln!("Error: {e}");
//!         std::process::exit(1);
//!     }
//! }
//! ```
//!
//! The same binary doubles as the worker: the supervisor re-executes it with
//! a hidden flag, and [`run`] then serves cases over IPC instead.

mod config;
mod report;
mod supervisor;

pub use config::*;
pub use report::*;
pub use supervisor::*;

use anyhow::Context;
use clap::Parser;
use regex::Regex;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use timebox_core::{
    CaseRunner, EngineError, NullReporter, RunOptions, Tally, TestModule, ThreadRunner,
    WorkerMain, enter_worker_mode,
};
use tracing_subscriber::EnvFilter;

/// Timebox CLI arguments
#[derive(Parser, Debug)]
#[command(name = "timebox")]
#[command(author, version, about = "Timebox - time-bounded test runner")]
pub struct Cli {
    /// Run test sets whose name matches this regex
    #[arg(default_value = ".*")]
    pub filter: String,

    /// Output format: human, json
    #[arg(long)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// List sets and cases without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Print full result messages and debug logs
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not enforce time limits; unexpected faults abort the run
    #[arg(long)]
    pub no_time_limit: bool,

    /// Where case actions run
    #[arg(long, value_enum)]
    pub isolation: Option<IsolationMode>,

    /// Time a new worker gets to report in (e.g. "10s")
    #[arg(long)]
    pub startup_timeout: Option<String>,

    /// Configuration file (default: nearest timebox.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print a default timebox.toml and exit
    #[arg(long)]
    pub print_config: bool,

    /// Internal: Run as worker process (used by supervisor)
    #[arg(long, hide = true)]
    pub timebox_worker: bool,
}

/// Harness-level failures
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The set filter is not a valid regex
    #[error("invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),

    /// Cases failed and `fail_on_failure` is set
    #[error("{failed} of {total} test case(s) failed")]
    CasesFailed {
        /// Failed cases
        failed: usize,
        /// Classified cases
        total: usize,
    },
}

/// Effective settings after layering timebox.toml and CLI flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Where actions run
    pub isolation: IsolationMode,
    /// Report format
    pub format: OutputFormat,
    /// Enforce time limits
    pub check_time_limit: bool,
    /// Full messages instead of tags
    pub verbose: bool,
    /// Worker handshake timeout
    pub startup_timeout: Duration,
    /// Error exit on failed cases
    pub fail_on_failure: bool,
}

impl Settings {
    /// CLI flags win over the file.
    pub fn resolve(cli: &Cli, config: &TimeboxConfig) -> anyhow::Result<Self> {
        let format = cli
            .format
            .as_deref()
            .unwrap_or(&config.output.format)
            .parse::<OutputFormat>()
            .map_err(anyhow::Error::msg)?;
        let startup_timeout = TimeboxConfig::parse_duration(
            cli.startup_timeout
                .as_deref()
                .unwrap_or(&config.runner.startup_timeout),
        )
        .context("invalid startup timeout")?;

        Ok(Self {
            isolation: cli.isolation.unwrap_or(config.runner.isolation),
            format,
            check_time_limit: !cli.no_time_limit && config.runner.check_time_limit,
            verbose: cli.verbose || config.output.verbose,
            startup_timeout,
            fail_on_failure: config.runner.fail_on_failure,
        })
    }
}

/// Run the harness with the process arguments.
///
/// `build` creates the test module; in a worker process it runs with
/// calibration disabled.
pub fn run<F>(build: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Result<TestModule, EngineError>,
{
    run_with_cli(Cli::parse(), build)
}

/// Run the harness with pre-parsed arguments.
pub fn run_with_cli<F>(cli: Cli, build: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Result<TestModule, EngineError>,
{
    // Handle worker mode first (before any other initialization)
    if cli.timebox_worker {
        return run_worker_mode(build);
    }

    init_logging(if cli.verbose {
        "timebox_core=debug,timebox_cli=debug"
    } else {
        "timebox_core=info,timebox_cli=info"
    });

    if cli.print_config {
        print!("{}", TimeboxConfig::default_toml());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => TimeboxConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TimeboxConfig::discover().unwrap_or_default(),
    };
    let settings = Settings::resolve(&cli, &config)?;
    let filter = Regex::new(&cli.filter).map_err(HarnessError::Filter)?;

    let mut module = build()?;
    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };

    if cli.dry_run {
        return list_sets(&module, &filter, &mut out);
    }

    let totals = run_sets(&mut module, &filter, &settings, out)?;
    if settings.fail_on_failure && totals.failed > 0 {
        return Err(HarnessError::CasesFailed {
            failed: totals.failed,
            total: totals.total(),
        }
        .into());
    }
    Ok(())
}

/// Run as a worker process (IPC mode)
fn run_worker_mode<F>(build: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Result<TestModule, EngineError>,
{
    enter_worker_mode();
    init_logging("timebox_core=warn,timebox_cli=warn");

    let module = build().context("building test module in worker")?;
    WorkerMain::new()
        .run(&module)
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Already initialised when the harness is driven twice in one process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn list_sets(module: &TestModule, filter: &Regex, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "Timebox Plan:")?;

    let mut sets = 0;
    let mut cases = 0;
    for summary in module.summaries() {
        if !filter.is_match(&summary.name) {
            continue;
        }
        writeln!(out, "├── {}: {}", summary.name, summary.description)?;
        for case in &summary.cases {
            let expects = case
                .expected_fault
                .as_ref()
                .map(|kind| format!(", expects {kind}"))
                .unwrap_or_default();
            writeln!(
                out,
                "│   ├── {:>2}. {} [{} units{}]",
                case.index + 1,
                case.description,
                case.time_limit,
                expects
            )?;
            cases += 1;
        }
        sets += 1;
    }

    writeln!(out, "{sets} sets, {cases} cases found.")?;
    Ok(())
}

fn run_sets(
    module: &mut TestModule,
    filter: &Regex,
    settings: &Settings,
    mut out: Box<dyn Write>,
) -> anyhow::Result<Tally> {
    let mut runner: Box<dyn CaseRunner> = match settings.isolation {
        IsolationMode::Process => Box::new(ProcessRunner::new(settings.startup_timeout)?),
        IsolationMode::Thread => Box::new(ThreadRunner),
    };
    let options = RunOptions {
        check_time_limit: settings.check_time_limit,
        verbose: settings.verbose,
    };
    let selected = |name: &str| filter.is_match(name);

    let totals = match settings.format {
        OutputFormat::Human => {
            let mut reporter = TextReporter::new(out);
            let totals = module.run_all(&selected, runner.as_mut(), options, &mut reporter);
            reporter.finish()?;
            totals?
        }
        OutputFormat::Json => {
            let totals =
                module.run_all(&selected, runner.as_mut(), options, &mut NullReporter)?;
            let report = RunReport {
                timestamp: chrono::Utc::now(),
                check_time_limit: settings.check_time_limit,
                totals,
                score: module.score(),
                sets: module.summaries(),
            };
            writeln!(out, "{}", generate_json_report(&report)?)?;
            totals
        }
    };

    tracing::info!(
        passed = totals.passed,
        failed = totals.failed,
        score = module.score(),
        "run complete"
    );
    Ok(totals)
}
