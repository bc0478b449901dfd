//! Error types for SceneTest

use thiserror::Error;

/// Result type alias using the SceneTest error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by step registration, scheduling and the log protocol
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid step name {name:?}: {reason}")]
    InvalidStepName { name: String, reason: String },

    #[error("Step already registered: {0}")]
    DuplicateStep(String),

    #[error("Invalid step timing for {step}: {reason}")]
    InvalidTiming { step: String, reason: String },

    #[error("Host error: {0}")]
    Host(String),

    #[error("Step failed: {0}")]
    Step(String),
}
