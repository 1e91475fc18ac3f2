use std::path::PathBuf;

use thiserror::Error;

use crate::chat::ChatError;

use super::gate::format_bytes;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("download of {url} failed: {detail}")]
    Transfer { url: String, detail: String },
    #[error("{url} does not reference any media segments")]
    EmptyMedia { url: String },
    #[error("failed to start merge tool {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("ffmpeg failed (status {status:?}): {stderr}")]
    Merge { status: Option<i32>, stderr: String },
    #[error("merged file is {actual} bytes, above the {limit} byte upload limit")]
    SizeLimitExceeded { actual: u64, limit: u64 },
    #[error("upload failed: {0}")]
    Delivery(#[from] ChatError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl ProcessorError {
    pub(crate) fn transfer(url: &str, detail: impl ToString) -> Self {
        ProcessorError::Transfer {
            url: url.to_string(),
            detail: detail.to_string(),
        }
    }

    /// The single status line shown to the requester.
    pub fn user_message(&self) -> String {
        match self {
            ProcessorError::SizeLimitExceeded { actual, limit } => format!(
                "⚠️ The merged video is {}, above the {} upload limit. Cannot upload.",
                format_bytes(*actual),
                format_bytes(*limit)
            ),
            ProcessorError::Merge { stderr, .. } => {
                format!("❌ Error: ffmpeg failed: {}", stderr.trim())
            }
            ProcessorError::Io { source, .. } => format!("❌ Error: {source}"),
            other => format!("❌ Error: {other}"),
        }
    }
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;
