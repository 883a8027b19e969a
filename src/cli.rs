//! Command-line surface - argument definitions, logger setup and the run driver

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::config::{self, Config};
use crate::core::{execute, expand};
use crate::parser::parse_commands;

/// Run commands concurrently, honoring dependencies between them
#[derive(Debug, Parser)]
#[command(name = "forkflow")]
pub struct Cli {
    /// Semicolon-separated commands to execute
    #[arg(short = 'e', long = "execute", default_value = "")]
    pub execute: String,

    /// Number of concurrent workers (0 = one per command)
    #[arg(short = 'c', long = "count", default_value_t = 0, allow_negative_numbers = true)]
    pub count: i32,

    /// Enable pipeline mode
    #[arg(short, long)]
    pub pipeline: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Timeout per command, in the configured time unit
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Logging level (INFO, DEBUG, WARN, ERROR)
    #[arg(long, default_value = "ERROR")]
    pub log_level: String,

    /// Config file to use instead of the default lookup
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Change default settings (JSON object) and exit
    #[arg(long)]
    pub cfg: Option<String>,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Make dependents wait for their dependency even without pipelining
    #[arg(long)]
    pub strict_order: bool,

    /// Show tool version
    #[arg(short = 'V', long)]
    pub version: bool,
}

impl Cli {
    /// Effective log level; verbose always means debug
    pub fn log_level(&self) -> Result<log::LevelFilter> {
        if self.verbose {
            return Ok(log::LevelFilter::Debug);
        }
        Ok(config::parse_log_level(&self.log_level)?)
    }
}

/// Initialize the logger; `RUST_LOG` still overrides the chosen level
pub fn init_logger(level: log::LevelFilter) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.to_string()))
        .format_timestamp(None)
        .init();
}

/// Drive one invocation to completion
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::auto_load(cli.config.as_deref())?;

    if cli.version {
        println!("{} version {}", config.name, config.version);
        return Ok(());
    }

    if let Some(changes) = cli.cfg.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        let Some(path) = Config::locate(cli.config.as_deref()) else {
            bail!("No config file found to change");
        };
        config::apply_changes(&path, changes).context("Error changing config settings")?;
        log::info!("Config successfully changed.");
        return Ok(());
    }

    let specs = parse_commands(cli.execute.trim())?;
    if specs.is_empty() {
        bail!("No commands given. Pass them with -e \"cmd1; cmd2\"");
    }
    let commands = expand(&specs);

    let mut settings = config.settings();
    settings.thread_count = cli.count;
    settings.pipeline = cli.pipeline;
    settings.verbose = cli.verbose;
    settings.wait_for_dependencies |= cli.strict_order;
    if let Some(timeout) = cli.timeout {
        settings.timeout = config.time_unit.duration(timeout);
    }

    log::info!(
        "Running {} commands on {} workers",
        commands.len(),
        settings.worker_count(commands.len())
    );

    let result = execute(commands, settings).await;

    let report = match &result {
        Ok(report) => Some(report),
        Err(e) => e.report(),
    };
    if let (Some(path), Some(report)) = (cli.report.as_deref(), report) {
        report
            .save(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }

    result?;
    Ok(())
}
