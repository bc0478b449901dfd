//! SceneTest Common Library
//!
//! The pieces shared by the harness and the processes it drives: explicit
//! step registration, the tick-driven step scheduler, the validation log
//! protocol and the completion sentinel.

pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod sentinel;
pub mod steps;

pub use error::{Error, Result};
pub use protocol::{
    parse_validation_log, read_validation_log, sanitize_file_component, LoggedStep,
    ValidationLogEntry, ValidationLogWriter,
};
pub use scheduler::{Context, SchedulerState, ScriptHost, StepContext, StepScheduler};
pub use sentinel::SentinelChannel;
pub use steps::{RegisteredStep, StepDescriptor, StepRegistry, ValidatorKind};

/// SceneTest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
