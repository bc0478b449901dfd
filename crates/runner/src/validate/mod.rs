//! Validation of logged step artifacts

pub mod performance;
pub mod rendering;
pub mod text;

use scenetest_common::{LoggedStep, ValidationLogEntry};
use tracing::{debug, warn};

use crate::definition::CaseLayout;
use crate::result::{RunMode, StepOutcome, StepResult, TextResult, Verdict};

pub use rendering::{
    BuiltinComparator, CompareError, ImageMagickComparator, PixelComparator, RenderingValidator,
};

/// Turns logged steps into step outcomes
pub struct Validators {
    rendering: RenderingValidator,
}

impl Validators {
    pub fn new(rendering: RenderingValidator) -> Self {
        Self { rendering }
    }

    pub fn rendering(&self) -> &RenderingValidator {
        &self.rendering
    }

    pub fn validate_steps(
        &self,
        steps: &[LoggedStep],
        layout: &CaseLayout,
        mode: RunMode,
    ) -> Vec<StepOutcome> {
        steps
            .iter()
            .map(|step| self.validate_step(step, layout, mode))
            .collect()
    }

    /// Performance figures are kept only when another validator on the same
    /// step passed.
    pub fn validate_step(&self, step: &LoggedStep, layout: &CaseLayout, mode: RunMode) -> StepOutcome {
        let mut results = Vec::new();
        let mut performance = Vec::new();

        for entry in &step.entries {
            match entry {
                ValidationLogEntry::Screenshot(output) => {
                    let pattern = layout.rendering_baseline_pattern(output);
                    let result = if mode.compares() {
                        self.rendering
                            .validate(&pattern, output, &layout.diff_path(output))
                    } else {
                        self.rendering.unvalidated(&pattern, output)
                    };
                    results.push(StepResult::Rendering(result));
                }
                ValidationLogEntry::Console(lines) => {
                    results.push(StepResult::Console(self.text(step, "console", lines, layout, mode)));
                }
                ValidationLogEntry::Custom(lines) => {
                    results.push(StepResult::Custom(self.text(step, "custom", lines, layout, mode)));
                }
                ValidationLogEntry::Performance(samples) => {
                    match performance::summarize(samples) {
                        Some(stats) => performance.push(stats),
                        None => warn!("Step '{}' logged no usable frame samples", step.name),
                    }
                }
                ValidationLogEntry::StepName(name) => {
                    warn!("Unexpected step name '{}' inside step '{}'", name, step.name);
                }
            }
        }

        let paired = results
            .iter()
            .any(|r| r.verdict() == Some(Verdict::Passed));
        if paired {
            results.extend(performance.into_iter().map(StepResult::Performance));
        } else if !performance.is_empty() {
            debug!(
                "Step '{}': performance figures dropped, no validator passed",
                step.name
            );
        }

        StepOutcome::new(step.name.clone(), results)
    }

    fn text(
        &self,
        step: &LoggedStep,
        kind: &str,
        lines: &[String],
        layout: &CaseLayout,
        mode: RunMode,
    ) -> TextResult {
        let baseline = layout.text_baseline(&step.name, kind);
        let mut result = if mode.compares() {
            text::validate_text(&baseline, lines)
        } else {
            text::unvalidated_text(&baseline, lines)
        };

        let artifact = layout.text_artifact(&step.name, kind);
        let content: String = lines.iter().map(|l| format!("{l}\n")).collect();
        match std::fs::write(&artifact, content) {
            Ok(()) => result.artifact = Some(artifact),
            Err(e) => warn!("Could not write {}: {}", artifact.display(), e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{parse_definitions, DefinitionEntry};
    use crate::variation::Variation;
    use std::path::Path;

    fn layout(dir: &Path) -> CaseLayout {
        let entries = parse_definitions(
            "[spin]\nx3d = 'spin.x3d'\ntype = 'rendering'\n",
            &dir.join("suite.testdef"),
        )
        .unwrap();
        let DefinitionEntry::Case(case) = &entries[0] else {
            panic!("expected a runnable case");
        };
        let layout = CaseLayout::new(case, &Variation::default());
        layout.prepare().unwrap();
        std::fs::create_dir_all(&layout.baseline_dir).unwrap();
        layout
    }

    fn validators() -> Validators {
        Validators::new(RenderingValidator::new(Box::new(BuiltinComparator::new(3.0)), 5))
    }

    fn step(entries: Vec<ValidationLogEntry>) -> LoggedStep {
        LoggedStep {
            name: "spin".to_string(),
            entries,
        }
    }

    #[test]
    fn test_performance_kept_with_passing_validator() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        std::fs::write(layout.text_baseline("spin", "console"), "ok\n").unwrap();

        let outcome = validators().validate_step(
            &step(vec![
                ValidationLogEntry::Console(vec!["ok".into()]),
                ValidationLogEntry::Performance(vec![10.0, 20.0, 30.0]),
            ]),
            &layout,
            RunMode::Full,
        );

        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 2);
        assert!(matches!(&outcome.results[1], StepResult::Performance(s) if s.median == 20.0));
    }

    #[test]
    fn test_performance_dropped_without_passing_validator() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        let outcome = validators().validate_step(
            &step(vec![
                ValidationLogEntry::Console(vec!["no baseline".into()]),
                ValidationLogEntry::Performance(vec![60.0]),
            ]),
            &layout,
            RunMode::Full,
        );

        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].verdict(), Some(Verdict::Skipped));
    }

    #[test]
    fn test_text_artifact_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        let outcome = validators().validate_step(
            &step(vec![ValidationLogEntry::Custom(vec!["value=3".into()])]),
            &layout,
            RunMode::GenerateOnly,
        );

        let StepResult::Custom(result) = &outcome.results[0] else {
            panic!("expected a custom result");
        };
        assert_eq!(result.verdict, Verdict::Unvalidated);
        let artifact = result.artifact.as_ref().unwrap();
        assert_eq!(std::fs::read_to_string(artifact).unwrap(), "value=3\n");
    }

    #[test]
    fn test_failed_text_fails_step() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        std::fs::write(layout.text_baseline("spin", "console"), "expected\n").unwrap();

        let outcome = validators().validate_step(
            &step(vec![ValidationLogEntry::Console(vec!["actual".into()])]),
            &layout,
            RunMode::Full,
        );
        assert!(!outcome.success);
    }
}
