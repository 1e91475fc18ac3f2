//! Telegram Bot API adapter: a thin JSON client, the [`IncomingMessage`]
//! implementation handed to the pipeline, and the long-polling update loop.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::chat::{ChatError, ChatResult, IncomingMessage, ReplyHandle};
use crate::config::TelegramSection;
use crate::processor::{Processor, RequestOutcome};

pub const HELP_TEXT: &str = "👋 <b>Welcome!</b>\n\n\
Send me an <code>.m3u8</code> playlist URL or a direct video download link.\n\
I'll download, merge, and upload the video (max 2GB).\n\n\
<b>Commands:</b>\n\
/start - Show welcome message\n\
/help - Show this help\n";

/// Extra time granted to a long poll beyond the server-side wait.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
}

impl Update {
    pub fn into_message(self) -> Option<Message> {
        self.message.or(self.channel_post)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub caption: Option<String>,
}

impl Message {
    pub fn content(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: [&'static str; 2],
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i64,
}

/// Minimal Bot API client over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    endpoint: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // endpoint embeds the token
        f.debug_struct("TelegramClient").finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(http: Client, api_base_url: &str, token: &str) -> Self {
        let endpoint = format!("{}/bot{}", api_base_url.trim_end_matches('/'), token);
        Self { http, endpoint }
    }

    pub fn from_config(config: &TelegramSection, token: &str) -> ChatResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("segmerge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(http, &config.api_base_url, token))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    async fn call<B, T>(&self, method: &'static str, body: &B) -> ChatResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        unwrap_response(method, response.json().await?)
    }

    pub async fn get_me(&self) -> ChatResult<User> {
        self.call("getMe", &serde_json::json!({})).await
    }

    pub async fn get_updates(&self, offset: Option<i64>, timeout: u64) -> ChatResult<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout,
            allowed_updates: ["message", "channel_post"],
        };
        let response = self
            .http
            .post(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(timeout) + POLL_GRACE)
            .json(&request)
            .send()
            .await?;
        unwrap_response("getUpdates", response.json().await?)
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        parse_mode: Option<&str>,
    ) -> ChatResult<Message> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode,
            reply_to_message_id: reply_to,
        };
        self.call("sendMessage", &request).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> ChatResult<()> {
        let request = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
        };
        self.call::<_, serde_json::Value>("editMessageText", &request)
            .await
            .map(|_| ())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> ChatResult<()> {
        let request = DeleteMessageRequest {
            chat_id,
            message_id,
        };
        self.call::<_, bool>("deleteMessage", &request)
            .await
            .map(|_| ())
    }

    /// Upload a local video, streaming it from disk.
    pub async fn send_video(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        reply_to: Option<i64>,
    ) -> ChatResult<Message> {
        let file = fs::File::open(path)
            .await
            .map_err(|source| ChatError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let length = file
            .metadata()
            .await
            .map_err(|source| ChatError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "video.mp4".to_string());
        let part = Part::stream_with_length(Body::from(file), length)
            .file_name(file_name)
            .mime_str(video_mime(path))?;
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("supports_streaming", "true")
            .part("video", part);
        if let Some(reply_to) = reply_to {
            form = form.text("reply_to_message_id", reply_to.to_string());
        }
        let response = self
            .http
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .send()
            .await?;
        unwrap_response("sendVideo", response.json().await?)
    }
}

fn unwrap_response<T>(method: &'static str, response: ApiResponse<T>) -> ChatResult<T> {
    match response {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse { description, .. } => Err(ChatError::Api {
            method,
            description: description.unwrap_or_else(|| "no result returned".to_string()),
        }),
    }
}

fn video_mime(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "flv" => "video/x-flv",
        "ts" => "video/mp2t",
        _ => "video/mp4",
    }
}

/// One received message bound to the client that answers it.
#[derive(Debug, Clone)]
pub struct TelegramMessage {
    client: TelegramClient,
    chat_id: i64,
    message_id: i64,
    text: Option<String>,
}

impl TelegramMessage {
    pub fn new(client: TelegramClient, message: &Message) -> Self {
        Self {
            client,
            chat_id: message.chat.id,
            message_id: message.message_id,
            text: message.content().map(str::to_string),
        }
    }
}

#[async_trait]
impl IncomingMessage for TelegramMessage {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    async fn reply_text(&self, text: &str) -> ChatResult<ReplyHandle> {
        let sent = self
            .client
            .send_message(self.chat_id, text, Some(self.message_id), None)
            .await?;
        Ok(ReplyHandle {
            message_id: sent.message_id,
        })
    }

    async fn edit_reply(&self, reply: ReplyHandle, text: &str) -> ChatResult<()> {
        self.client
            .edit_message_text(self.chat_id, reply.message_id, text)
            .await
    }

    async fn delete_reply(&self, reply: ReplyHandle) -> ChatResult<()> {
        self.client
            .delete_message(self.chat_id, reply.message_id)
            .await
    }

    async fn reply_video(&self, path: &Path, caption: &str) -> ChatResult<()> {
        self.client
            .send_video(self.chat_id, path, caption, Some(self.message_id))
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
}

/// Recognise `/start` and `/help`, optionally addressed as `/help@bot_name`.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<BotCommand> {
    let token = text.split_whitespace().next()?.strip_prefix('/')?;
    let (name, target) = match token.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (token, None),
    };
    if let (Some(target), Some(username)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(username) {
            return None;
        }
    }
    match name {
        "start" => Some(BotCommand::Start),
        "help" => Some(BotCommand::Help),
        _ => None,
    }
}

/// Long-polls for updates and runs each message through the [`Processor`] on its own task.
pub struct TelegramBot {
    client: TelegramClient,
    processor: Arc<Processor>,
    poll_timeout: u64,
    backoff: Duration,
}

impl TelegramBot {
    pub fn new(client: TelegramClient, processor: Arc<Processor>, config: &TelegramSection) -> Self {
        Self {
            client,
            processor,
            poll_timeout: config.poll_timeout_seconds,
            backoff: Duration::from_secs(config.poll_backoff_seconds),
        }
    }

    /// Serve until `shutdown` resolves; in-flight requests are then aborted,
    /// which drops (and so removes) their scratch areas.
    pub async fn run<S>(&self, shutdown: S) -> ChatResult<()>
    where
        S: Future<Output = ()>,
    {
        let me = self.client.get_me().await?;
        let username = me.username.clone();
        info!(bot = ?username, "telegram bot started");

        tokio::pin!(shutdown);
        let mut offset = None;
        let mut tasks = JoinSet::new();
        loop {
            let polled = tokio::select! {
                _ = &mut shutdown => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "request task failed");
                    }
                    continue;
                }
                polled = self.client.get_updates(offset, self.poll_timeout) => polled,
            };
            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        if let Some(message) = update.into_message() {
                            self.dispatch(message, username.as_deref(), &mut tasks).await;
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, wait = ?self.backoff, "polling updates failed");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(self.backoff) => {}
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "telegram bot stopping");
        tasks.shutdown().await;
        Ok(())
    }

    async fn dispatch(
        &self,
        message: Message,
        username: Option<&str>,
        tasks: &mut JoinSet<()>,
    ) {
        if message.from.as_ref().is_some_and(|user| user.is_bot) {
            return;
        }
        if let Some(command) = message.content().and_then(|text| parse_command(text, username)) {
            debug!(chat_id = message.chat.id, ?command, "command received");
            if let Err(err) = self
                .client
                .send_message(
                    message.chat.id,
                    HELP_TEXT,
                    Some(message.message_id),
                    Some("HTML"),
                )
                .await
            {
                warn!(chat_id = message.chat.id, error = %err, "failed to send help text");
            }
            return;
        }

        let incoming = TelegramMessage::new(self.client.clone(), &message);
        let processor = Arc::clone(&self.processor);
        let chat_id = message.chat.id;
        tasks.spawn(async move {
            let report = processor.handle(&incoming).await;
            if report.outcome != RequestOutcome::Ignored {
                info!(
                    chat_id,
                    request_id = %report.request_id,
                    outcome = ?report.outcome,
                    "request finished"
                );
            }
        });
    }
}
