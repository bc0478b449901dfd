//! SceneTest Harness
//!
//! Drives a scene viewer through scripted test cases and validates what it
//! leaves behind:
//! - Loads `*.testdef` case definitions and their variations
//! - Writes a variant scene with the step-script hook injected
//! - Launches the target, waits for its completion sentinel and stops it
//! - Compares screenshots, console and custom output against baselines
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TestCaseRunner                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_all(dir, aggregator) -> SuiteSummary                   │
//! │    ├── discover() / load_definition_file()                  │
//! │    └── run_case(definition, variation) -> TestResult        │
//! │          ├── Variation::apply() + HookTemplate::render()    │
//! │          ├── ProcessHandle::test_launch()                   │
//! │          ├── ProcessHandle::launch() / signal_stop() / kill │
//! │          └── Validators::validate_steps()                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Target process                                             │
//! │    ├── <prefix>validation.txt   (validation log)            │
//! │    ├── <prefix>test_complete    (sentinel)                  │
//! │    └── <prefix><step>.png       (screenshots)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod definition;
pub mod error;
pub mod hook;
pub mod process;
pub mod report;
pub mod result;
pub mod runner;
pub mod validate;
pub mod variation;

pub use config::{ComparatorKind, HarnessConfig};
pub use definition::{CaseLayout, CaseType, DefinitionEntry, TestCaseDefinition};
pub use error::{HarnessError, HarnessResult};
pub use report::{
    exit_code, text_report, FanOut, JsonLinesAggregator, ResultAggregator, SuiteSummary,
    SummaryWriter,
};
pub use result::{RunMode, StepOutcome, StepResult, TestResult, Verdict};
pub use runner::TestCaseRunner;
pub use variation::{SceneOption, Variation};
