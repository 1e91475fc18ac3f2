use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use segmerge_core::processor::ScratchArea;
use segmerge_core::telegram::TelegramBot;
use segmerge_core::{
    load_segmerge_config, ChatError, ChatResult, ConfigError, IncomingMessage, Processor,
    ProcessorError, ReplyHandle, RequestOutcome, RequestReport, SegmergeConfig, TelegramClient,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("processing error: {0}")]
    Processor(#[from] ProcessorError),
    #[error("chat error: {0}")]
    Chat(#[from] ChatError),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Merge HLS playlists and video links, then send them back over Telegram", long_about = None)]
pub struct Cli {
    /// Path to segmerge.toml
    #[arg(long, default_value = "configs/segmerge.toml")]
    pub config: PathBuf,
    /// Bot token; overrides telegram.bot_token
    #[arg(long, env = "SEGMERGE_BOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the Telegram bot until interrupted
    Serve,
    /// Process one link locally and write the result to a file
    Fetch(FetchArgs),
    /// Verify configuration, scratch space, ffmpeg and the bot token
    Check,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Message text containing a playlist or video link
    pub text: String,
    /// Where to write the merged video
    #[arg(long, short)]
    pub output: PathBuf,
    /// Allow file:// links (playlists and segments on local disk)
    #[arg(long, default_value_t = false)]
    pub allow_file_urls: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_segmerge_config(&cli.config)?;
    init_tracing(&config.logging.level);
    if let Some(token) = &cli.token {
        config.telegram.bot_token = Some(token.clone());
    }

    match &cli.command {
        Commands::Serve => serve(&config).await,
        Commands::Fetch(args) => {
            let summary = fetch(&mut config, args).await?;
            render(&summary, cli.format)?;
            match summary.report.outcome {
                RequestOutcome::Delivered { .. } => Ok(()),
                RequestOutcome::Ignored => Err(AppError::MissingResource(
                    "no playlist or video link in input".to_string(),
                )),
                RequestOutcome::Rejected { .. } | RequestOutcome::Failed { .. } => Err(
                    AppError::RequestFailed(summary.last_status.unwrap_or_default()),
                ),
            }
        }
        Commands::Check => {
            let report = check(&config).await;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
            Ok(())
        }
    }
}

/// Install the fmt subscriber; `RUST_LOG` wins over the configured level.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn serve(config: &SegmergeConfig) -> Result<()> {
    let token = bot_token(config)?;
    let processor = Arc::new(Processor::new(config)?);
    let client = TelegramClient::from_config(&config.telegram, token)?;
    let bot = TelegramBot::new(client, processor, &config.telegram);
    bot.run(shutdown_signal()).await?;
    info!("segmerge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}

fn bot_token(config: &SegmergeConfig) -> Result<&str> {
    config
        .telegram
        .bot_token
        .as_deref()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| {
            AppError::MissingResource("bot token (--token or SEGMERGE_BOT_TOKEN)".to_string())
        })
}

async fn fetch(config: &mut SegmergeConfig, args: &FetchArgs) -> Result<FetchSummary> {
    if args.allow_file_urls {
        config.download.allow_file_urls = true;
    }
    let processor = Processor::new(config)?;
    let message = ConsoleMessage::new(args.text.clone(), args.output.clone());
    let report = processor.handle(&message).await;
    Ok(FetchSummary {
        output: matches!(report.outcome, RequestOutcome::Delivered { .. })
            .then(|| args.output.clone()),
        last_status: message.last_status(),
        report,
    })
}

async fn check(config: &SegmergeConfig) -> Vec<HealthEntry> {
    let mut entries = vec![HealthEntry::ok(
        "config",
        format!("upload limit {} bytes", config.limits.upload_limit_bytes),
    )];

    match ScratchArea::create(config.paths.scratch_dir.as_deref()) {
        Ok(scratch) => {
            entries.push(HealthEntry::ok(
                "scratch",
                format!("{}", scratch.path().display()),
            ));
            scratch.close();
        }
        Err(err) => entries.push(HealthEntry::error("scratch", err.to_string())),
    }

    match Processor::new(config) {
        Ok(processor) => match processor.concatenator().check().await {
            Ok(version) => entries.push(HealthEntry::ok("ffmpeg", version)),
            Err(err) => entries.push(HealthEntry::error("ffmpeg", err.to_string())),
        },
        Err(err) => entries.push(HealthEntry::error("http client", err.to_string())),
    }

    match bot_token(config) {
        Ok(token) => match TelegramClient::from_config(&config.telegram, token) {
            Ok(client) => match client.get_me().await {
                Ok(me) => entries.push(HealthEntry::ok(
                    "telegram",
                    format!("@{}", me.username.unwrap_or(me.first_name)),
                )),
                Err(err) => entries.push(HealthEntry::error("telegram", err.to_string())),
            },
            Err(err) => entries.push(HealthEntry::error("telegram", err.to_string())),
        },
        Err(_) => entries.push(HealthEntry::warn("telegram", "no bot token configured")),
    }

    entries
}

/// Stands in for a chat message when running `fetch` from a terminal:
/// status lines go to stderr and the video is copied to `output`.
pub struct ConsoleMessage {
    text: String,
    output: PathBuf,
    next_id: AtomicI64,
    last_status: std::sync::Mutex<Option<String>>,
}

impl ConsoleMessage {
    pub fn new(text: String, output: PathBuf) -> Self {
        Self {
            text,
            output,
            next_id: AtomicI64::new(1),
            last_status: std::sync::Mutex::new(None),
        }
    }

    pub fn last_status(&self) -> Option<String> {
        self.last_status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn print(&self, text: &str) {
        eprintln!("{text}");
        *self
            .last_status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(text.to_string());
    }
}

#[async_trait]
impl IncomingMessage for ConsoleMessage {
    fn text(&self) -> Option<&str> {
        Some(&self.text)
    }

    async fn reply_text(&self, text: &str) -> ChatResult<ReplyHandle> {
        self.print(text);
        Ok(ReplyHandle {
            message_id: self.next_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn edit_reply(&self, _reply: ReplyHandle, text: &str) -> ChatResult<()> {
        self.print(text);
        Ok(())
    }

    async fn delete_reply(&self, _reply: ReplyHandle) -> ChatResult<()> {
        Ok(())
    }

    async fn reply_video(&self, path: &Path, caption: &str) -> ChatResult<()> {
        tokio::fs::copy(path, &self.output)
            .await
            .map_err(|source| ChatError::Io {
                path: self.output.clone(),
                source,
            })?;
        self.print(caption);
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct FetchSummary {
    pub output: Option<PathBuf>,
    pub last_status: Option<String>,
    pub report: RequestReport,
}

impl DisplayFallback for FetchSummary {
    fn display(&self) -> String {
        let states: Vec<String> = self
            .report
            .states
            .iter()
            .map(ToString::to_string)
            .collect();
        let mut lines = vec![
            format!("request  {}", self.report.request_id),
            format!("states   {}", states.join(" -> ")),
        ];
        match (&self.report.outcome, &self.output) {
            (RequestOutcome::Delivered { size_bytes }, Some(output)) => {
                lines.push(format!("output   {} ({size_bytes} bytes)", output.display()));
            }
            (outcome, _) => lines.push(format!("outcome  {outcome:?}")),
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
