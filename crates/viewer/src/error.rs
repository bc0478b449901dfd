//! Error types for the viewer

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Scene not readable at {path}: {source}")]
    Scene {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Step script not readable at {path}: {source}")]
    ScriptIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid step script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid screen size '{0}', expected WIDTHxHEIGHT")]
    Screen(String),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Step(#[from] scenetest_common::Error),
}

pub type ViewerResult<T> = Result<T, ViewerError>;
