//! Full case runs against small shell targets
#![cfg(unix)]

use std::path::Path;

use scenetest_runner::config::{HarnessConfig, TargetConfig, TimingConfig};
use scenetest_runner::{RunMode, StepResult, TestCaseRunner, Verdict};

/// Reads the hook out of the variant scene, writes one console step and
/// signals completion, then idles until stopped.
const COOPERATIVE: &str = r#"
log=$(sed -n 's/.*log="\([^"]*\)".*/\1/p' "$1")
sentinel=$(sed -n 's/.*sentinel="\([^"]*\)".*/\1/p' "$1")
printf 'greet\nconsole_start\nhello\nconsole_end\n' > "$log"
printf OK > "$sentinel"
echo "warning: demo"
while true; do sleep 0.1; done
"#;

const STUBBORN: &str = "trap '' TERM; echo 'error: stuck'; while true; do sleep 0.1; done";

const QUITTER: &str = "exit 0";

fn config(script: &str) -> HarnessConfig {
    HarnessConfig {
        target: TargetConfig {
            binary: "sh".into(),
            load_flags: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
        },
        timing: TimingConfig {
            startup_multiplier: 20,
            shutdown_wait: 1.0,
            exit_poll: 0.05,
            wait_tick: 0.05,
            output_grace: 1.0,
        },
        ..HarnessConfig::default()
    }
}

fn write_suite(dir: &Path) {
    std::fs::write(
        dir.join("scene.x3d"),
        "<X3D><Scene><Shape/></Scene></X3D>\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("suite.testdef"),
        "[greet]\nx3d = 'scene.x3d'\ntype = 'rendering'\nstarttime = 0.1\ntimeout = 0.5\n",
    )
    .unwrap();
}

#[tokio::test]
async fn test_cooperative_target_passes() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());
    std::fs::create_dir_all(dir.path().join("baseline")).unwrap();
    std::fs::write(dir.path().join("baseline/greet_console.txt"), "hello\n").unwrap();

    let runner = TestCaseRunner::new(config(COOPERATIVE), RunMode::Full).unwrap();
    let mut results = Vec::new();
    let summary = runner.run_all(dir.path(), &mut results).await.unwrap();

    assert_eq!(summary.total, 1);
    let result = &results[0];
    assert!(result.started_ok, "{result:?}");
    assert!(result.terminated_ok, "{result:?}");
    assert_eq!(result.warnings, 1);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].step_name, "greet");
    let StepResult::Console(console) = &result.steps[0].results[0] else {
        panic!("expected a console result: {result:?}");
    };
    assert_eq!(console.verdict, Verdict::Passed);
    assert_eq!(summary.exit_code(), 0);

    // Variant scenes are cleaned up
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".scenetest-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_target_ignoring_stop_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    let mut config = config(STUBBORN);
    config.timing.startup_multiplier = 3;
    config.timing.shutdown_wait = 0.5;
    let runner = TestCaseRunner::new(config, RunMode::Full).unwrap();
    let mut results = Vec::new();
    let summary = runner.run_all(dir.path(), &mut results).await.unwrap();

    let result = &results[0];
    assert!(result.started_ok);
    assert!(!result.terminated_ok);
    assert!(result.is_failure());
    assert_eq!(summary.failed, 1);

    // Output is still collected after the forced kill
    assert_eq!(result.stdout, vec!["error: stuck".to_string()]);
    assert_eq!(result.errors, 1);
    assert!(result.steps.iter().all(|s| s.step_name != "setup"));
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn test_target_exiting_early_fails_both_checks() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    let runner = TestCaseRunner::new(config(QUITTER), RunMode::Full).unwrap();
    let mut results = Vec::new();
    runner.run_all(dir.path(), &mut results).await.unwrap();

    let result = &results[0];
    assert!(!result.started_ok);
    assert!(!result.terminated_ok);
    assert!(result.steps[0].results.iter().any(|r| matches!(r, StepResult::Error { .. })));
}

#[tokio::test]
async fn test_missing_binary_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    let mut config = config(QUITTER);
    config.target.binary = dir.path().join("no-such-viewer");
    let runner = TestCaseRunner::new(config, RunMode::Full).unwrap();
    let mut results = Vec::new();
    runner.run_all(dir.path(), &mut results).await.unwrap();

    let result = &results[0];
    assert!(!result.started_ok);
    assert_eq!(result.steps[0].step_name, "setup");
    assert!(result.is_failure());
}

#[tokio::test]
async fn test_failed_launch_ignores_log_from_earlier_run() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());
    std::fs::create_dir_all(dir.path().join("output")).unwrap();
    std::fs::write(
        dir.path().join("output/greet_validation.txt"),
        "hello\nconsole_start\nhi\nconsole_end\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("output/greet_test_complete"), "OK").unwrap();
    std::fs::create_dir_all(dir.path().join("baseline")).unwrap();
    std::fs::write(dir.path().join("baseline/hello_console.txt"), "hi\n").unwrap();

    let mut config = config(QUITTER);
    config.target.binary = dir.path().join("no-such-viewer");
    let runner = TestCaseRunner::new(config, RunMode::Full).unwrap();
    let mut results = Vec::new();
    runner.run_all(dir.path(), &mut results).await.unwrap();

    let result = &results[0];
    assert!(result.is_failure());
    let names: Vec<_> = result.steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, vec!["setup", "validation log"]);
    assert!(!dir.path().join("output/greet_validation.txt").exists());
    assert!(!dir.path().join("output/greet_test_complete").exists());
}
