pub mod chat;
pub mod classifier;
pub mod config;
pub mod error;
pub mod processor;
pub mod telegram;

pub use chat::{ChatError, ChatResult, IncomingMessage, ReplyHandle};
pub use classifier::{classify, MediaKind, MediaRequest};
pub use config::{load_segmerge_config, SegmergeConfig};
pub use error::{ConfigError, Result};
pub use processor::{
    Concatenator, PipelineState, Processor, ProcessorError, ProcessorResult, RequestOutcome,
    RequestReport, SegmentFetcher,
};
pub use telegram::{TelegramBot, TelegramClient, TelegramMessage};
