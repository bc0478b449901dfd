//! Test case runner
//!
//! Each case and variation goes through
//!
//! ```text
//! BUILD-VARIANT -> START-PROBE -> LAUNCH -> WAIT
//!   -> (still running) SIGNAL-STOP -> WAIT-FOR-EXIT
//!   -> (still running) FORCE-KILL -> COLLECT
//! ```
//!
//! COLLECT always runs, and the generated variant scene is removed once the
//! validation log has been parsed.

use std::path::Path;
use std::time::{Duration, Instant};

use scenetest_common::{read_validation_log, SentinelChannel};
use tempfile::NamedTempFile;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::definition::{
    discover, load_definition_file, CaseLayout, DefinitionEntry, TestCaseDefinition,
};
use crate::error::{HarnessError, HarnessResult};
use crate::hook::HookTemplate;
use crate::process::ProcessHandle;
use crate::report::{ResultAggregator, SuiteSummary};
use crate::result::{RunMode, StepOutcome, StepResult, TestResult};
use crate::validate::{RenderingValidator, Validators};
use crate::variation::Variation;

const MIN_WAIT_TICK: Duration = Duration::from_millis(10);

/// Runs test cases against the configured target
pub struct TestCaseRunner {
    config: HarnessConfig,
    mode: RunMode,
    hook: HookTemplate,
    validators: Validators,
}

impl TestCaseRunner {
    /// Fails when the configured hook template cannot be read
    pub fn new(config: HarnessConfig, mode: RunMode) -> HarnessResult<Self> {
        let hook = HookTemplate::load(&config.hook)?;
        let validators = Validators::new(RenderingValidator::from_config(&config.rendering));
        info!(
            "Runner ready (mode: {:?}, comparator: {})",
            mode,
            validators.rendering().comparator_name()
        );
        Ok(Self {
            config,
            mode,
            hook,
            validators,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Run every case found under `working_dir`
    ///
    /// Case failures are reported through the results and report sinks that
    /// fail are logged; only configuration problems (unreadable definitions,
    /// missing directory) abort the run.
    pub async fn run_all(
        &self,
        working_dir: &Path,
        aggregator: &mut dyn ResultAggregator,
    ) -> HarnessResult<SuiteSummary> {
        let start = Instant::now();
        let files = discover(working_dir, &self.config.discovery.extensions)?;
        info!(
            "Found {} definition file(s) under {}",
            files.len(),
            working_dir.display()
        );

        let mut results = Vec::new();
        for file in files {
            for entry in load_definition_file(&file)? {
                match entry {
                    DefinitionEntry::Incomplete {
                        source,
                        name,
                        reason,
                    } => {
                        let result = TestResult::skipped(source, name, self.mode, reason);
                        record(aggregator, &result);
                        results.push(result);
                    }
                    DefinitionEntry::Case(definition) => {
                        for variation in &definition.variations {
                            let result = self.run_case(&definition, variation).await;
                            record(aggregator, &result);
                            results.push(result);
                        }
                    }
                }
            }
        }

        let summary = SuiteSummary::from_results(results, start.elapsed());
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            summary.passed, summary.failed, summary.skipped, summary.duration_ms
        );
        if let Err(e) = aggregator.finish(&summary) {
            error!("Could not write the suite summary: {}", e);
        }
        Ok(summary)
    }

    /// Run one case under one variation. Never fails; problems end up in
    /// the result.
    pub async fn run_case(
        &self,
        definition: &TestCaseDefinition,
        variation: &Variation,
    ) -> TestResult {
        let start = Instant::now();
        let mut result = TestResult::new(&definition.source, &definition.name, self.mode);
        result.case_type = Some(definition.case_type);
        result.variation = variation.name.clone();
        debug!("Running {} / {}", definition.name, variation.name);

        let layout = CaseLayout::new(definition, variation);
        let mut variant = None;
        match layout.prepare() {
            Err(e) => setup_failed(&mut result, e),
            Ok(()) if self.mode.executes() => {
                match self.execute(definition, variation, &layout, &mut result).await {
                    Ok(file) => variant = Some(file),
                    Err(e) => setup_failed(&mut result, e),
                }
            }
            Ok(()) => {}
        }

        self.collect(&layout, &mut result);

        if let Some(file) = variant {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                warn!("Could not remove variant {}: {}", path.display(), e);
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        if result.is_failure() {
            error!(
                "✗ {} [{}] (started: {}, terminated: {})",
                result.case_name, result.variation, result.started_ok, result.terminated_ok
            );
        } else {
            info!(
                "✓ {} [{}] ({} ms)",
                result.case_name, result.variation, result.duration_ms
            );
        }
        result
    }

    async fn execute(
        &self,
        definition: &TestCaseDefinition,
        variation: &Variation,
        layout: &CaseLayout,
        result: &mut TestResult,
    ) -> HarnessResult<NamedTempFile> {
        let timing = &self.config.timing;
        layout.clear_previous_run()?;

        // BUILD-VARIANT
        let scene = std::fs::read_to_string(&definition.scene).map_err(|source| {
            HarnessError::Scene {
                path: definition.scene.clone(),
                source,
            }
        })?;
        let varied = variation.apply(&scene)?;
        result.variation_changed = varied.changed;

        let hook = self.hook.render(layout, definition.script.as_deref());
        let hooked = Variation::default().with_hook(&hook).apply(&varied.document)?;

        // Next to the original so relative references still resolve
        let scene_dir = definition
            .scene
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let variant = tempfile::Builder::new()
            .prefix(".scenetest-")
            .suffix(".x3d")
            .tempfile_in(scene_dir)?;
        std::fs::write(variant.path(), &hooked.document)?;
        debug!("Variant scene written to {}", variant.path().display());

        let command = self.config.target.command_for(variant.path());
        let sentinel = SentinelChannel::new(&layout.sentinel);

        // START-PROBE
        let multiplier = if hooked.insertion_failed {
            1
        } else {
            timing.startup_multiplier
        };
        result.started_ok = ProcessHandle::test_launch(
            &command,
            scene_dir,
            definition.startup_delay,
            timing.shutdown_wait(),
            multiplier,
            &sentinel,
        )
        .await;
        if !result.started_ok {
            warn!("{}: target failed the startup probe", definition.name);
        }

        // LAUNCH, dropping whatever the probe wrote
        layout.clear_previous_run()?;
        let mut handle = ProcessHandle::launch(&command, scene_dir)?;

        // WAIT
        let tick = timing.wait_tick().max(MIN_WAIT_TICK);
        let budget = definition.startup_delay + definition.timeout;
        let attempts = (budget.as_secs_f64() / tick.as_secs_f64()).ceil().max(1.0) as u64;
        for _ in 0..attempts {
            sleep(tick).await;
            if sentinel.is_signalled() || !handle.is_running() {
                break;
            }
        }

        if !handle.is_running() {
            result.terminated_ok = sentinel.is_signalled();
            if !result.terminated_ok {
                warn!(
                    "{}: target exited before finishing its steps ({:?})",
                    definition.name,
                    handle.exit_status()
                );
            }
        } else {
            // SIGNAL-STOP
            if let Err(e) = handle.signal_stop() {
                warn!("{}: stop request failed: {}", definition.name, e);
            }
            // WAIT-FOR-EXIT
            result.terminated_ok = handle
                .wait_for_exit(timing.shutdown_wait(), timing.exit_poll())
                .await;
            if !result.terminated_ok {
                // FORCE-KILL
                warn!(
                    "{}: target ignored the stop request for {:?}",
                    definition.name,
                    timing.shutdown_wait()
                );
                if let Err(e) = handle.kill() {
                    error!("{}: forced kill failed: {}", definition.name, e);
                }
                if !handle
                    .wait_for_exit(timing.shutdown_wait(), timing.exit_poll())
                    .await
                {
                    error!("{}: target survived a forced kill", definition.name);
                }
            }
        }

        let output = handle.collect_output(timing.output_grace()).await;
        if output.dropped_lines > 0 {
            warn!(
                "{}: {} line(s) of early output were dropped",
                definition.name, output.dropped_lines
            );
        }
        result.stdout = output.stdout;
        result.stderr = output.stderr;
        result.count_diagnostics();

        Ok(variant)
    }

    // COLLECT
    fn collect(&self, layout: &CaseLayout, result: &mut TestResult) {
        match read_validation_log(&layout.validation_log) {
            Ok(steps) => {
                debug!(
                    "{} step(s) in {}",
                    steps.len(),
                    layout.validation_log.display()
                );
                result
                    .steps
                    .extend(self.validators.validate_steps(&steps, layout, self.mode));
            }
            Err(e) => {
                warn!(
                    "Validation log {} unreadable: {}",
                    layout.validation_log.display(),
                    e
                );
                result.steps.push(StepOutcome::new(
                    "validation log",
                    vec![StepResult::Error {
                        message: format!("{}: {}", layout.validation_log.display(), e),
                    }],
                ));
            }
        }
    }
}

/// A sink that cannot keep up is logged; the remaining cases still run
fn record(aggregator: &mut dyn ResultAggregator, result: &TestResult) {
    if let Err(e) = aggregator.record(result) {
        error!(
            "Could not record {} [{}]: {}",
            result.case_name, result.variation, e
        );
    }
}

fn setup_failed(result: &mut TestResult, e: HarnessError) {
    error!("{}: {}", result.case_name, e);
    result.steps.push(StepOutcome::new(
        "setup",
        vec![StepResult::Error {
            message: e.to_string(),
        }],
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Verdict;

    fn suite(dir: &Path, definitions: &str) {
        std::fs::write(dir.join("suite.testdef"), definitions).unwrap();
    }

    #[tokio::test]
    async fn test_validate_only_reads_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        suite(dir.path(), "[greet]\nx3d = 'scene.x3d'\ntype = 'screenshot'\n");
        std::fs::create_dir_all(dir.path().join("output")).unwrap();
        std::fs::write(
            dir.path().join("output/greet_validation.txt"),
            "hello\nconsole_start\nhi\nconsole_end\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("baseline")).unwrap();
        std::fs::write(dir.path().join("baseline/hello_console.txt"), "hi\n").unwrap();

        let runner = TestCaseRunner::new(HarnessConfig::default(), RunMode::ValidateOnly).unwrap();
        let mut results = Vec::new();
        let summary = runner.run_all(dir.path(), &mut results).await.unwrap();

        assert_eq!(summary.passed, 1);
        let result = &results[0];
        assert!(!result.started_ok);
        assert!(!result.is_failure());
        assert_eq!(result.steps[0].step_name, "hello");
        assert_eq!(result.steps[0].results[0].verdict(), Some(Verdict::Passed));
        assert!(dir.path().join("output/text/greet_hello_console.txt").exists());
    }

    #[tokio::test]
    async fn test_validate_only_without_log_fails() {
        let dir = tempfile::tempdir().unwrap();
        suite(dir.path(), "[greet]\nx3d = 'scene.x3d'\ntype = 'screenshot'\n");

        let runner = TestCaseRunner::new(HarnessConfig::default(), RunMode::ValidateOnly).unwrap();
        let mut results = Vec::new();
        let summary = runner.run_all(dir.path(), &mut results).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(results[0].steps[0].step_name, "validation log");
    }

    #[tokio::test]
    async fn test_incomplete_case_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        suite(dir.path(), "[unfinished]\ntype = 'rendering'\n");

        let runner = TestCaseRunner::new(HarnessConfig::default(), RunMode::Full).unwrap();
        let mut results = Vec::new();
        let summary = runner.run_all(dir.path(), &mut results).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(results[0].skip_reason.as_deref(), Some("missing 'x3d'"));
    }

    #[tokio::test]
    async fn test_malformed_definition_aborts() {
        let dir = tempfile::tempdir().unwrap();
        suite(dir.path(), "[broken\n");

        let runner = TestCaseRunner::new(HarnessConfig::default(), RunMode::Full).unwrap();
        let mut results = Vec::new();
        let err = runner.run_all(dir.path(), &mut results).await.unwrap_err();
        assert!(matches!(err, HarnessError::DefinitionParse { .. }));
    }

    struct BrokenSink;

    impl ResultAggregator for BrokenSink {
        fn record(&mut self, _result: &TestResult) -> HarnessResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }

        fn finish(&mut self, _summary: &SuiteSummary) -> HarnessResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }
    }

    #[tokio::test]
    async fn test_failing_report_sink_does_not_stop_the_suite() {
        let dir = tempfile::tempdir().unwrap();
        suite(
            dir.path(),
            "[first]\ntype = 'rendering'\n[second]\ntype = 'rendering'\n",
        );

        let runner = TestCaseRunner::new(HarnessConfig::default(), RunMode::Full).unwrap();
        let summary = runner.run_all(dir.path(), &mut BrokenSink).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn test_unreadable_hook_template_is_fatal() {
        let mut config = HarnessConfig::default();
        config.hook.template = Some("/nonexistent/hook.xml".into());
        assert!(matches!(
            TestCaseRunner::new(config, RunMode::Full),
            Err(HarnessError::HookTemplate { .. })
        ));
    }
}
