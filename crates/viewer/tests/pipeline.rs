//! Harness driving the real viewer binary end to end
#![cfg(unix)]

use std::path::Path;

use scenetest_runner::config::{ComparatorKind, HarnessConfig, TargetConfig, TimingConfig};
use scenetest_runner::{RunMode, StepResult, TestCaseRunner, TestResult, Verdict};

const SCENE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<X3D profile="Immersive">
  <Scene>
    <Background DEF="sky" skyColor="0 0 1"/>
    <Shape/>
  </Scene>
</X3D>
"#;

const SCRIPT: &str = r#"
steps:
  - name: sky
    validate:
      - kind: rendering
      - kind: console
      - kind: performance
        run_time: 0.2
    actions:
      - action: print
        message: frame ready
  - name: values
    validate:
      - kind: custom
    actions:
      - action: set
        node: sky
        field: skyColor
        value: "0 1 0"
      - action: custom
        message: sky=green
"#;

const DEFINITIONS: &str = r#"
[sky]
x3d = "scene.x3d"
type = "rendering"
script = "script.yaml"
starttime = 0.2
timeout = 3.0

[[sky.variations]]
name = "Default"

[[sky.variations]]
name = "Red"
options = [{ nodes = ["Background"], field = "skyColor", value = "1 0 0" }]
"#;

fn config() -> HarnessConfig {
    let mut config = HarnessConfig {
        target: TargetConfig {
            binary: env!("CARGO_BIN_EXE_scenetest-viewer").into(),
            load_flags: vec!["--no-fullscreen".to_string(), "--screen=32x24".to_string()],
        },
        timing: TimingConfig {
            startup_multiplier: 25,
            shutdown_wait: 3.0,
            exit_poll: 0.05,
            wait_tick: 0.05,
            output_grace: 2.0,
        },
        ..HarnessConfig::default()
    };
    config.rendering.comparator = ComparatorKind::Builtin;
    config
}

fn write_suite(dir: &Path) {
    std::fs::write(dir.join("scene.x3d"), SCENE).unwrap();
    std::fs::write(dir.join("script.yaml"), SCRIPT).unwrap();
    std::fs::write(dir.join("suite.testdef"), DEFINITIONS).unwrap();
}

async fn run(dir: &Path, mode: RunMode) -> Vec<TestResult> {
    let runner = TestCaseRunner::new(config(), mode).unwrap();
    let mut results = Vec::new();
    runner.run_all(dir, &mut results).await.unwrap();
    results
}

fn verdicts(result: &TestResult, step: &str) -> Vec<(&'static str, Option<Verdict>)> {
    result
        .steps
        .iter()
        .find(|s| s.step_name == step)
        .unwrap_or_else(|| panic!("no step '{step}' in {result:?}"))
        .results
        .iter()
        .map(|r| (r.kind(), r.verdict()))
        .collect()
}

#[tokio::test]
async fn test_first_run_then_baselined_run() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    // No baselines yet: everything is skipped, nothing fails
    let results = run(dir.path(), RunMode::Full).await;
    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(result.started_ok, "{result:?}");
        assert!(result.terminated_ok, "{result:?}");
        assert!(!result.is_failure(), "{result:?}");
    }
    assert!(!results[0].variation_changed);
    assert!(results[1].variation_changed);
    assert_eq!(
        verdicts(&results[0], "sky"),
        vec![
            ("rendering", Some(Verdict::Skipped)),
            ("console", Some(Verdict::Skipped)),
        ]
    );

    // Bootstrap baselines from the Default run
    let output = dir.path().join("output");
    let baseline = dir.path().join("baseline");
    std::fs::create_dir_all(&baseline).unwrap();
    std::fs::copy(output.join("sky_sky.png"), baseline.join("sky_sky.png")).unwrap();
    std::fs::copy(output.join("sky_sky.png"), baseline.join("sky_Red_sky.png")).unwrap();
    std::fs::copy(
        output.join("text/sky_sky_console.txt"),
        baseline.join("sky_console.txt"),
    )
    .unwrap();
    std::fs::copy(
        output.join("text/sky_values_custom.txt"),
        baseline.join("values_custom.txt"),
    )
    .unwrap();

    let results = run(dir.path(), RunMode::Full).await;

    let default = &results[0];
    assert!(!default.is_failure(), "{default:?}");
    let sky = verdicts(default, "sky");
    assert_eq!(sky[0], ("rendering", Some(Verdict::Passed)));
    assert_eq!(sky[1], ("console", Some(Verdict::Passed)));
    assert_eq!(sky[2].0, "performance");
    assert_eq!(
        verdicts(default, "values"),
        vec![("custom", Some(Verdict::Passed))]
    );

    // The red sky no longer matches the blue baseline
    let red = &results[1];
    assert!(red.is_failure());
    let step = red.steps.iter().find(|s| s.step_name == "sky").unwrap();
    let StepResult::Rendering(rendering) = &step.results[0] else {
        panic!("expected a rendering result: {red:?}");
    };
    assert_eq!(rendering.verdict, Verdict::Failed);
    assert_eq!(rendering.differing_pixels, Some(32 * 24));
    assert!(rendering.diff.as_ref().unwrap().exists());
}

#[tokio::test]
async fn test_validate_only_reuses_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());
    run(dir.path(), RunMode::GenerateOnly).await;

    let results = run(dir.path(), RunMode::ValidateOnly).await;
    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(!result.is_failure(), "{result:?}");
        assert_eq!(result.steps.len(), 2);
    }
}
