//! Result aggregation and reports

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::HarnessResult;
use crate::result::{StepResult, TestResult};

pub const RESULTS_JSONL: &str = "results.jsonl";
pub const RESULTS_JSON: &str = "results.json";
pub const SUMMARY_TXT: &str = "summary.txt";

/// Receives every result as soon as it is known
pub trait ResultAggregator {
    fn record(&mut self, result: &TestResult) -> HarnessResult<()>;

    fn finish(&mut self, _summary: &SuiteSummary) -> HarnessResult<()> {
        Ok(())
    }
}

/// Keeps results in memory
impl ResultAggregator for Vec<TestResult> {
    fn record(&mut self, result: &TestResult) -> HarnessResult<()> {
        self.push(result.clone());
        Ok(())
    }
}

/// Appends one JSON object per result to `<output>/results.jsonl`
pub struct JsonLinesAggregator {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesAggregator {
    /// Truncates any earlier file
    pub fn create(output_dir: &Path) -> HarnessResult<Self> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(RESULTS_JSONL);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultAggregator for JsonLinesAggregator {
    fn record(&mut self, result: &TestResult) -> HarnessResult<()> {
        serde_json::to_writer(&mut self.writer, result)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self, _summary: &SuiteSummary) -> HarnessResult<()> {
        self.writer.flush()?;
        info!("Results streamed to: {}", self.path.display());
        Ok(())
    }
}

/// Writes `results.json` and `summary.txt` once the run is over
pub struct SummaryWriter {
    output_dir: PathBuf,
}

impl SummaryWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ResultAggregator for SummaryWriter {
    fn record(&mut self, _result: &TestResult) -> HarnessResult<()> {
        Ok(())
    }

    fn finish(&mut self, summary: &SuiteSummary) -> HarnessResult<()> {
        write_summary(&self.output_dir, summary)?;
        let path = self.output_dir.join(SUMMARY_TXT);
        std::fs::write(&path, text_report(&summary.results))?;
        info!("Report written to: {}", path.display());
        Ok(())
    }
}

/// Forwards to several aggregators in order
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn ResultAggregator>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ResultAggregator + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ResultAggregator for FanOut {
    fn record(&mut self, result: &TestResult) -> HarnessResult<()> {
        for sink in &mut self.sinks {
            sink.record(result)?;
        }
        Ok(())
    }

    fn finish(&mut self, summary: &SuiteSummary) -> HarnessResult<()> {
        for sink in &mut self.sinks {
            sink.finish(summary)?;
        }
        Ok(())
    }
}

/// Whole-run totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl SuiteSummary {
    pub fn from_results(results: Vec<TestResult>, duration: Duration) -> Self {
        let failed = results.iter().filter(|r| r.is_failure()).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        Self {
            total: results.len(),
            passed: results.len() - failed - skipped,
            failed,
            skipped,
            duration_ms: duration.as_millis() as u64,
            results,
        }
    }

    pub fn exit_code(&self) -> i32 {
        exit_code(&self.results)
    }
}

/// 0 when nothing failed, 1 otherwise
pub fn exit_code(results: &[TestResult]) -> i32 {
    if results.iter().any(TestResult::is_failure) {
        1
    } else {
        0
    }
}

pub fn write_summary(output_dir: &Path, summary: &SuiteSummary) -> HarnessResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(RESULTS_JSON);
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json)?;
    info!("Results written to: {}", path.display());
    Ok(path)
}

/// Human readable report of every case, step and validator
pub fn text_report(results: &[TestResult]) -> String {
    let mut out = String::new();
    for result in results {
        let status = if result.skipped {
            "SKIPPED"
        } else if result.is_failure() {
            "FAILED"
        } else {
            "PASSED"
        };
        let _ = writeln!(
            out,
            "{} {} [{}] ({})",
            status,
            result.case_name,
            result.variation,
            result.filename.display()
        );
        if let Some(reason) = &result.skip_reason {
            let _ = writeln!(out, "  reason: {reason}");
            continue;
        }
        if result.mode.executes() {
            let _ = writeln!(
                out,
                "  started: {}, terminated: {}, variation changed scene: {}",
                yes_no(result.started_ok),
                yes_no(result.terminated_ok),
                yes_no(result.variation_changed)
            );
            let _ = writeln!(
                out,
                "  output: {} warning(s), {} error(s)",
                result.warnings, result.errors
            );
        }
        for step in &result.steps {
            let _ = writeln!(
                out,
                "  step '{}': {}",
                step.step_name,
                if step.success { "ok" } else { "failed" }
            );
            for validator in &step.results {
                let _ = writeln!(out, "    {}", describe(validator));
            }
        }
    }

    let failed = results.iter().filter(|r| r.is_failure()).count();
    let skipped = results.iter().filter(|r| r.skipped).count();
    let _ = writeln!(
        out,
        "\n{} case(s): {} passed, {} failed, {} skipped",
        results.len(),
        results.len() - failed - skipped,
        failed,
        skipped
    );
    out
}

fn describe(result: &StepResult) -> String {
    match result {
        StepResult::Rendering(r) => {
            let mut line = format!("rendering: {} ({})", r.verdict, r.output.display());
            if let Some(count) = r.differing_pixels {
                let _ = write!(line, ", {count} differing pixel(s)");
            }
            if let Some(diff) = &r.diff {
                let _ = write!(line, ", diff {}", diff.display());
            }
            if let Some(message) = &r.message {
                let _ = write!(line, ", {message}");
            }
            line
        }
        StepResult::Console(t) | StepResult::Custom(t) => {
            let mut line = format!("{}: {}", result.kind(), t.verdict);
            if let Some(message) = &t.message {
                let _ = write!(line, " ({message})");
            }
            for diff in t.diff.iter().filter(|l| !l.starts_with("  ")) {
                let _ = write!(line, "\n      {diff}");
            }
            line
        }
        StepResult::Performance(stats) => {
            format!("performance: {} over {} sample(s)", stats, stats.samples)
        }
        StepResult::Error { message } => format!("error: {message}"),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
