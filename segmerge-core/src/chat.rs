use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat transport error: {0}")]
    Http(reqwest::Error),
    #[error("chat api rejected {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
}

impl From<reqwest::Error> for ChatError {
    /// Request URLs carry the bot token, so they never reach the message text.
    fn from(err: reqwest::Error) -> Self {
        ChatError::Http(err.without_url())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

/// A reply previously sent by the bot, addressable for edits and deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyHandle {
    pub message_id: i64,
}

/// What the pipeline needs from an inbound chat message.
///
/// Implementations wrap one platform message and the long-lived client used to
/// answer it.
#[async_trait]
pub trait IncomingMessage: Send + Sync {
    fn text(&self) -> Option<&str>;

    async fn reply_text(&self, text: &str) -> ChatResult<ReplyHandle>;

    async fn edit_reply(&self, reply: ReplyHandle, text: &str) -> ChatResult<()>;

    async fn delete_reply(&self, reply: ReplyHandle) -> ChatResult<()>;

    async fn reply_video(&self, path: &Path, caption: &str) -> ChatResult<()>;
}
