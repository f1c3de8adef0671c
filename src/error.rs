use std::path::PathBuf;

use crate::env::ObservationMode;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Errors that can occur while persisting or restoring artifacts.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("model directory {0} has no base name to derive an artifact name from")]
    InvalidModelDir(PathBuf),

    #[error("failed to save model: {0}")]
    ModelSave(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("failed to read normalization statistics from {path}: {source}")]
    StatsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse normalization statistics from {path}: {source}")]
    StatsParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("normalization is enabled but the model environment carries no normalization wrapper")]
    MissingStats,

    #[error("failed to read metadata from {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse metadata from {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while driving training.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("no policy available for {0} observations; configure a depth or rgbd observation mode")]
    PolicyUnavailable(ObservationMode),

    #[error("driver has no checkpoint path to load from")]
    NoLoadDir,

    #[error("parameter '{name}' has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("source parameters are missing '{name}' required for an exact match")]
    MissingParameter { name: String },

    #[error("source parameters contain '{name}' unknown to the destination model")]
    UnexpectedParameter { name: String },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("model error: {0}")]
    Model(String),
}
