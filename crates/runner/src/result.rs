//! Result types produced by a test case run

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::CaseType;

/// Outcome of a single validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    /// No baseline to compare against
    Skipped,
    /// Comparison was not performed (tool missing or generate-only run)
    Unvalidated,
}

impl Verdict {
    pub fn is_failure(self) -> bool {
        self == Self::Failed
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Unvalidated => "unvalidated",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderingResult {
    pub verdict: Verdict,
    pub output: PathBuf,
    pub baseline: Option<PathBuf>,
    /// Kept only when the comparison failed
    pub diff: Option<PathBuf>,
    pub differing_pixels: Option<u64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResult {
    pub verdict: Verdict,
    pub baseline: PathBuf,
    /// Where the captured text was written for inspection or re-baselining
    pub artifact: Option<PathBuf>,
    pub output: Vec<String>,
    /// Line diff against the baseline: `"  "` equal, `"- "` baseline only,
    /// `"+ "` output only
    pub diff: Vec<String>,
    pub message: Option<String>,
}

/// Frame-rate summary. Never decides pass or fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {:.2}, max {:.2}, mean {:.2}, median {:.2}",
            self.min, self.max, self.mean, self.median
        )
    }
}

/// One validator result within a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepResult {
    Rendering(RenderingResult),
    Console(TextResult),
    Custom(TextResult),
    Performance(PerformanceStats),
    Error { message: String },
}

impl StepResult {
    /// `None` for results that carry no judgement
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Rendering(r) => Some(r.verdict),
            Self::Console(t) | Self::Custom(t) => Some(t.verdict),
            Self::Performance(_) => None,
            Self::Error { .. } => Some(Verdict::Failed),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.verdict().map_or(false, Verdict::is_failure)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rendering(_) => "rendering",
            Self::Console(_) => "console",
            Self::Custom(_) => "custom",
            Self::Performance(_) => "performance",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_name: String,
    pub success: bool,
    pub results: Vec<StepResult>,
}

impl StepOutcome {
    pub fn new(step_name: impl Into<String>, results: Vec<StepResult>) -> Self {
        let success = !results.iter().any(StepResult::is_failure);
        Self {
            step_name: step_name.into(),
            success,
            results,
        }
    }
}

/// Which phases of a case run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Execute the target and validate its artifacts
    #[default]
    Full,
    /// Validate artifacts left by an earlier run
    ValidateOnly,
    /// Execute the target without comparing anything
    GenerateOnly,
}

impl RunMode {
    pub fn executes(self) -> bool {
        self != Self::ValidateOnly
    }

    pub fn compares(self) -> bool {
        self != Self::GenerateOnly
    }
}

/// Everything known about one case and variation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Definition file the case came from
    pub filename: PathBuf,
    pub case_name: String,
    pub case_type: Option<CaseType>,
    pub variation: String,
    /// Whether the variation altered the scene text
    pub variation_changed: bool,
    pub mode: RunMode,
    pub started_ok: bool,
    pub terminated_ok: bool,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Occurrences of "warning" in the captured output
    pub warnings: usize,
    /// Occurrences of "error" in the captured output
    pub errors: usize,
    pub steps: Vec<StepOutcome>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn new(filename: impl Into<PathBuf>, case_name: impl Into<String>, mode: RunMode) -> Self {
        Self {
            filename: filename.into(),
            case_name: case_name.into(),
            case_type: None,
            variation: crate::variation::DEFAULT_VARIATION.to_string(),
            variation_changed: false,
            mode,
            started_ok: false,
            terminated_ok: false,
            skipped: false,
            skip_reason: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            warnings: 0,
            errors: 0,
            steps: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// A result for a case that could not be run at all
    pub fn skipped(
        filename: impl Into<PathBuf>,
        case_name: impl Into<String>,
        mode: RunMode,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Self::new(filename, case_name, mode)
        }
    }

    /// Did not start, or had to be killed
    pub fn process_failed(&self) -> bool {
        self.mode.executes() && !self.skipped && !(self.started_ok && self.terminated_ok)
    }

    pub fn validation_failed(&self) -> bool {
        self.steps.iter().any(|s| !s.success)
    }

    pub fn is_failure(&self) -> bool {
        self.process_failed() || self.validation_failed()
    }

    /// Count warnings and errors in the captured output
    pub fn count_diagnostics(&mut self) {
        let (mut warnings, mut errors) = (0, 0);
        for line in self.stdout.iter().chain(self.stderr.iter()) {
            let lower = line.to_lowercase();
            warnings += lower.matches("warning").count();
            errors += lower.matches("error").count();
        }
        self.warnings = warnings;
        self.errors = errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(verdict: Verdict) -> TextResult {
        TextResult {
            verdict,
            baseline: PathBuf::from("baseline/step_console.txt"),
            artifact: None,
            output: vec![],
            diff: vec![],
            message: None,
        }
    }

    #[test]
    fn test_step_success_ignores_skipped_and_unvalidated() {
        let outcome = StepOutcome::new(
            "s",
            vec![
                StepResult::Console(text(Verdict::Skipped)),
                StepResult::Custom(text(Verdict::Unvalidated)),
            ],
        );
        assert!(outcome.success);

        let outcome = StepOutcome::new(
            "s",
            vec![
                StepResult::Console(text(Verdict::Passed)),
                StepResult::Error {
                    message: "screenshot missing".into(),
                },
            ],
        );
        assert!(!outcome.success);
    }

    #[test]
    fn test_process_flags_ignored_when_validating_only() {
        let mut result = TestResult::new("a.testdef", "case", RunMode::ValidateOnly);
        assert!(!result.is_failure());

        result.mode = RunMode::Full;
        assert!(result.process_failed());

        result.started_ok = true;
        result.terminated_ok = true;
        assert!(!result.is_failure());
    }

    #[test]
    fn test_skipped_case_is_not_a_failure() {
        let result = TestResult::skipped("a.testdef", "case", RunMode::Full, "no scene");
        assert!(!result.is_failure());
    }

    #[test]
    fn test_count_diagnostics_is_case_insensitive() {
        let mut result = TestResult::new("a.testdef", "case", RunMode::Full);
        result.stdout = vec!["WARNING: slow".into(), "Error: x, error: y".into()];
        result.stderr = vec!["warning".into()];
        result.count_diagnostics();
        assert_eq!(result.warnings, 2);
        assert_eq!(result.errors, 2);
    }

    #[test]
    fn test_step_result_serializes_with_kind_tag() {
        let json = serde_json::to_value(StepResult::Error {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["message"], "boom");
    }
}
