//! SceneTest CLI - Main Entry Point
//!
//! Runs every test case found under a working directory against the
//! configured target and reports the outcome.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use scenetest_runner::{
    ComparatorKind, FanOut, HarnessConfig, JsonLinesAggregator, RunMode, SummaryWriter,
    TestCaseRunner,
};
use tracing::debug;

mod output;

/// Configuration file looked up in the working directory when `--config` is absent
const CONFIG_FILE: &str = "scenetest.toml";

/// SceneTest - scripted scene viewer test harness
#[derive(Parser)]
#[command(name = "scenetest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory searched for test definitions
    #[arg(long = "workingdir", env = "SCENETEST_WORKINGDIR")]
    working_dir: Option<PathBuf>,

    /// Directory receiving results.jsonl, results.json and summary.txt
    #[arg(long, default_value = "reports")]
    output: PathBuf,

    /// Validate artifacts of an earlier run without launching the target
    #[arg(long = "only_validate", alias = "only-validate", conflicts_with = "only_generate")]
    only_validate: bool,

    /// Launch the target and keep its artifacts without comparing them
    #[arg(long = "only_generate", alias = "only-generate")]
    only_generate: bool,

    /// Harness configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target binary, overriding the configuration
    #[arg(long)]
    target: Option<PathBuf>,

    /// Screenshot comparator, overriding the configuration
    #[arg(long)]
    comparator: Option<ComparatorArg>,

    /// Output format
    #[arg(long, default_value = "table")]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ComparatorArg {
    /// ImageMagick `compare`
    Imagemagick,
    /// In-process pixel comparison
    Builtin,
}

impl From<ComparatorArg> for ComparatorKind {
    fn from(arg: ComparatorArg) -> Self {
        match arg {
            ComparatorArg::Imagemagick => ComparatorKind::Imagemagick,
            ComparatorArg::Builtin => ComparatorKind::Builtin,
        }
    }
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.only_validate {
            RunMode::ValidateOnly
        } else if self.only_generate {
            RunMode::GenerateOnly
        } else {
            RunMode::Full
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mode = cli.mode();
    let working_dir = match &cli.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Cannot determine the current directory")?,
    };

    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load_required(path)?,
        None => HarnessConfig::load(&working_dir.join(CONFIG_FILE))?,
    };
    if let Some(target) = cli.target {
        config.target.binary = target;
    }
    if let Some(comparator) = cli.comparator {
        config.rendering.comparator = comparator.into();
    }
    debug!("Effective configuration: {:?}", config);

    let runner = TestCaseRunner::new(config, mode)?;
    let mut sinks = FanOut::new()
        .with(JsonLinesAggregator::create(&cli.output)?)
        .with(SummaryWriter::new(&cli.output));

    let summary = runner
        .run_all(&working_dir, &mut sinks)
        .await
        .with_context(|| format!("Run aborted in {}", working_dir.display()))?;

    output::print_summary(&summary, cli.format);
    output::print_info(&format!("Reports in {}", cli.output.display()));
    Ok(summary.exit_code())
}
