//! Error types shared by every stage of the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input directory or file does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// An external program could not be spawned or exited unsuccessfully.
    #[error("{tool} failed: {detail}")]
    ExternalTool { tool: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "opencv")]
    #[error("video decode error: {0}")]
    Decode(#[from] opencv::Error),

    #[error("inference error: {0}")]
    Inference(String),

    /// The annotation platform rejected a request or could not be reached.
    #[error("annotation platform error: {0}")]
    Platform(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn external(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::ExternalTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Every problem found while validating, reported together.
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}
