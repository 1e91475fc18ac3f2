mod concat;
mod error;
mod fetcher;
mod gate;
mod playlist;
mod progress;
mod scratch;
mod types;

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::{IncomingMessage, ReplyHandle};
use crate::classifier::{classify, classify_with_files, MediaRequest};
use crate::config::{SegmergeConfig, DEFAULT_UPLOAD_LIMIT_BYTES};

pub use concat::{
    manifest_path, render_manifest, CommandExecutor, Concatenator, SystemCommandExecutor,
};
pub use error::{ProcessorError, ProcessorResult};
pub use fetcher::SegmentFetcher;
pub use gate::{format_bytes, gate, GateDecision};
pub use playlist::{resolve_reference, PlaylistDocument, PlaylistResolver};
pub use progress::{ProgressStyle, ProgressTracker};
pub use scratch::ScratchArea;
pub use types::{
    MergedArtifact, PipelineState, ProgressEvent, RequestOutcome, RequestReport,
    SegmentReference,
};

pub const PROCESSING_TEXT: &str = "🔗 Processing your request...";
pub const PLAYLIST_DOWNLOAD_TEXT: &str = "📥 Downloading playlist and segments...";
pub const DIRECT_DOWNLOAD_TEXT: &str = "📥 Downloading video file...";
pub const MERGING_TEXT: &str = "🔄 Merging segments with ffmpeg...";
pub const UPLOADING_TEXT: &str = "⬆️ Uploading to Telegram...";
pub const SUCCESS_CAPTION: &str = "✅ Here is your video!";

/// Name of the merged file inside a scratch area.
const OUTPUT_STEM: &str = "output";

/// Runs one inbound message through classify, fetch, merge, gate and deliver.
///
/// Holds only long-lived handles; every call owns its own scratch area, so
/// one `Processor` can serve many requests concurrently.
#[derive(Debug, Clone)]
pub struct Processor {
    fetcher: SegmentFetcher,
    resolver: PlaylistResolver,
    concatenator: Concatenator,
    upload_limit: u64,
    scratch_parent: Option<PathBuf>,
    progress_interval: Duration,
}

impl Processor {
    pub fn new(config: &SegmergeConfig) -> ProcessorResult<Self> {
        let fetcher = SegmentFetcher::from_config(&config.download)?;
        let concatenator = Concatenator::new(&config.ffmpeg);
        Ok(Self::from_parts(fetcher, concatenator)
            .with_upload_limit(config.limits.upload_limit_bytes)
            .with_progress_interval(config.download.progress_interval())
            .with_scratch_dir(config.paths.scratch_dir.clone()))
    }

    pub fn from_parts(fetcher: SegmentFetcher, concatenator: Concatenator) -> Self {
        Self {
            resolver: PlaylistResolver::new(fetcher.clone()),
            fetcher,
            concatenator,
            upload_limit: DEFAULT_UPLOAD_LIMIT_BYTES,
            scratch_parent: None,
            progress_interval: Duration::from_secs(1),
        }
    }

    pub fn with_upload_limit(mut self, limit: u64) -> Self {
        self.upload_limit = limit;
        self
    }

    pub fn with_scratch_dir(mut self, parent: Option<PathBuf>) -> Self {
        self.scratch_parent = parent;
        self
    }

    pub fn with_progress_interval(mut self, cadence: Duration) -> Self {
        self.progress_interval = cadence;
        self
    }

    pub fn concatenator(&self) -> &Concatenator {
        &self.concatenator
    }

    pub fn upload_limit(&self) -> u64 {
        self.upload_limit
    }

    pub async fn handle(&self, message: &dyn IncomingMessage) -> RequestReport {
        let request_id = Uuid::new_v4();
        let mut report = RequestReport::new(request_id);

        let classifier: fn(&str) -> Option<MediaRequest> = if self.fetcher.allows_file_urls() {
            classify_with_files
        } else {
            classify
        };
        let Some(request) = message.text().and_then(classifier) else {
            report.enter(PipelineState::Idle);
            report.enter(PipelineState::Done);
            return report.finish(RequestOutcome::Ignored);
        };
        report.url = Some(request.url().to_string());
        report.kind = Some(request.kind());
        info!(%request_id, url = %request.url(), kind = %request.kind(), "media request accepted");

        let reply = match message.reply_text(PROCESSING_TEXT).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%request_id, error = %err, "could not acknowledge request");
                report.enter(PipelineState::ReportingError);
                report.enter(PipelineState::Done);
                return report.finish(RequestOutcome::Failed {
                    message: err.to_string(),
                });
            }
        };
        let status = StatusLine::new(message, reply, request_id);

        let outcome = match ScratchArea::create(self.scratch_parent.as_deref()) {
            Ok(scratch) => {
                let result = self
                    .run_pipeline(&request, &scratch, message, &status, &mut report)
                    .await;
                scratch.close();
                match result {
                    Ok(artifact) => {
                        info!(%request_id, size = artifact.size_bytes, "media delivered");
                        RequestOutcome::Delivered {
                            size_bytes: artifact.size_bytes,
                        }
                    }
                    Err(err) => self.report_error(&status, &mut report, err).await,
                }
            }
            Err(err) => self.report_error(&status, &mut report, err).await,
        };

        report.enter(PipelineState::Done);
        report.finish(outcome)
    }

    async fn run_pipeline(
        &self,
        request: &MediaRequest,
        scratch: &ScratchArea,
        message: &dyn IncomingMessage,
        status: &StatusLine<'_>,
        report: &mut RequestReport,
    ) -> ProcessorResult<MergedArtifact> {
        report.enter(PipelineState::Fetching);
        let artifact = if request.is_playlist() {
            status.show(PLAYLIST_DOWNLOAD_TEXT).await;
            let (tracker, receiver) = ProgressTracker::channel();
            let segments = self
                .with_progress(
                    status,
                    receiver,
                    ProgressStyle::Segments,
                    self.resolver.resolve(request.url(), scratch.path(), &tracker),
                )
                .await?;
            if segments.is_empty() {
                return Err(ProcessorError::EmptyMedia {
                    url: request.url().to_string(),
                });
            }

            report.enter(PipelineState::Merging);
            status.show(MERGING_TEXT).await;
            let output = scratch.join(format!("{OUTPUT_STEM}.mp4"));
            self.concatenator.concatenate(&segments, &output).await?
        } else {
            status.show(DIRECT_DOWNLOAD_TEXT).await;
            let extension = request.container_extension();
            let source = scratch.join(format!("source.{extension}"));
            let (tracker, receiver) = ProgressTracker::channel();
            let fetched = self
                .with_progress(
                    status,
                    receiver,
                    ProgressStyle::Bytes,
                    self.fetcher.fetch(request.url(), &source, &tracker),
                )
                .await?;

            report.enter(PipelineState::Merging);
            let output = scratch.join(format!("{OUTPUT_STEM}.{extension}"));
            self.concatenator.concatenate(&[fetched], &output).await?
        };

        report.enter(PipelineState::Gating);
        if let GateDecision::Rejected { actual, limit } =
            gate(&artifact.path, self.upload_limit).await?
        {
            return Err(ProcessorError::SizeLimitExceeded { actual, limit });
        }

        report.enter(PipelineState::Delivering);
        status.show(UPLOADING_TEXT).await;
        message.reply_video(&artifact.path, SUCCESS_CAPTION).await?;
        status.remove().await;
        Ok(artifact)
    }

    /// Drive `work` to completion, rendering its latest progress on a fixed cadence.
    async fn with_progress<F, T>(
        &self,
        status: &StatusLine<'_>,
        mut receiver: watch::Receiver<ProgressEvent>,
        style: ProgressStyle,
        work: F,
    ) -> ProcessorResult<T>
    where
        F: Future<Output = ProcessorResult<T>>,
    {
        tokio::pin!(work);
        let mut ticker = interval(self.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                result = &mut work => return result,
                _ = ticker.tick() => {
                    if receiver.has_changed().unwrap_or(false) {
                        let event = *receiver.borrow_and_update();
                        status.show(&style.render(event)).await;
                    }
                }
            }
        }
    }

    async fn report_error(
        &self,
        status: &StatusLine<'_>,
        report: &mut RequestReport,
        err: ProcessorError,
    ) -> RequestOutcome {
        report.enter(PipelineState::ReportingError);
        warn!(request_id = %status.request_id, error = %err, "request failed");
        status.show(&err.user_message()).await;
        match err {
            ProcessorError::SizeLimitExceeded { actual, limit } => {
                RequestOutcome::Rejected { actual, limit }
            }
            other => RequestOutcome::Failed {
                message: other.to_string(),
            },
        }
    }
}

/// The bot's own status reply for one request.
///
/// Edits that would not change the text are skipped; failed edits are logged
/// and otherwise ignored.
struct StatusLine<'a> {
    message: &'a dyn IncomingMessage,
    reply: ReplyHandle,
    request_id: Uuid,
    last: Mutex<String>,
}

impl<'a> StatusLine<'a> {
    fn new(message: &'a dyn IncomingMessage, reply: ReplyHandle, request_id: Uuid) -> Self {
        Self {
            message,
            reply,
            request_id,
            last: Mutex::new(PROCESSING_TEXT.to_string()),
        }
    }

    async fn show(&self, text: &str) {
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == text {
                return;
            }
            *last = text.to_string();
        }
        if let Err(err) = self.message.edit_reply(self.reply, text).await {
            warn!(request_id = %self.request_id, error = %err, "failed to update status message");
        }
    }

    async fn remove(&self) {
        if let Err(err) = self.message.delete_reply(self.reply).await {
            warn!(request_id = %self.request_id, error = %err, "failed to delete status message");
        }
    }
}
