use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop a screenshot on its way through the pipeline.
///
/// Errors are caught per file by the orchestrator and logged; none of them
/// terminate the watch loop. `Watch`, `Config` and `Http` only surface at
/// startup.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// File vanished or became unreadable during the settle window
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File was still empty after the settle window
    #[error("{} is still empty after the settle delay", .0.display())]
    EmptyFile(PathBuf),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("rename target already exists: {}", .target.display())]
    RenameConflict { target: PathBuf },

    #[error("failed to rename {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload failed: {0}")]
    Upload(String),

    /// Best-effort only, never propagated out of the pipeline
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
