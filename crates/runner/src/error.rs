//! Error types for the harness

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to parse test definition {path}: {source}")]
    DefinitionParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid test definition {path}: {reason}")]
    InvalidDefinition { path: PathBuf, reason: String },

    #[error("Hook template not readable at {path}: {source}")]
    HookTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Working directory not found: {0}")]
    WorkingDir(PathBuf),

    #[error("Failed to launch {command}: {reason}")]
    Launch { command: String, reason: String },

    #[error("Scene not readable at {path}: {source}")]
    Scene {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Baseline pattern error: {0}")]
    BaselinePattern(#[from] glob::PatternError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] scenetest_common::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
