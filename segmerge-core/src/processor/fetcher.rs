use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use url::Url;

use crate::config::DownloadSection;

use super::error::{ProcessorError, ProcessorResult};
use super::progress::ProgressTracker;

/// Read size used when copying `file://` sources.
const LOCAL_CHUNK_SIZE: usize = 256 * 1024;

/// Streams remote resources into local files.
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: Client,
    allow_file_urls: bool,
}

impl SegmentFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            allow_file_urls: false,
        }
    }

    pub fn from_config(config: &DownloadSection) -> ProcessorResult<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| ProcessorError::transfer("http client", err))?;
        Ok(Self::new(client).with_file_urls(config.allow_file_urls))
    }

    /// Serve `file://` URLs from the local filesystem.
    pub fn with_file_urls(mut self, allow: bool) -> Self {
        self.allow_file_urls = allow;
        self
    }

    pub fn allows_file_urls(&self) -> bool {
        self.allow_file_urls
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Download `url` into `destination`, reporting `(bytes, total)` after each chunk.
    ///
    /// A failed transfer leaves whatever was written in place; the caller's
    /// scratch area owns the file.
    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &ProgressTracker,
    ) -> ProcessorResult<PathBuf> {
        if let Some(source) = self.local_source(url)? {
            self.copy_local(url, &source, destination, progress).await?;
            return Ok(destination.to_path_buf());
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ProcessorError::transfer(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProcessorError::transfer(
                url,
                format!("server responded with {status}"),
            ));
        }
        let total = response.content_length().unwrap_or(0);
        let mut file = create_file(destination).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|err| {
                ProcessorError::transfer(url, format!("connection interrupted: {err}"))
            })?;
            file.write_all(&data)
                .await
                .map_err(|source| ProcessorError::Io {
                    path: destination.to_path_buf(),
                    source,
                })?;
            written += data.len() as u64;
            progress.report(written, total);
        }
        file.flush().await.map_err(|source| ProcessorError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        debug!(%url, bytes = written, path = %destination.display(), "download finished");
        Ok(destination.to_path_buf())
    }

    pub async fn fetch_text(&self, url: &str) -> ProcessorResult<String> {
        if let Some(source) = self.local_source(url)? {
            return fs::read_to_string(&source)
                .await
                .map_err(|err| ProcessorError::transfer(url, err));
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ProcessorError::transfer(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProcessorError::transfer(
                url,
                format!("server responded with {status}"),
            ));
        }
        response
            .text()
            .await
            .map_err(|err| ProcessorError::transfer(url, format!("connection interrupted: {err}")))
    }

    fn local_source(&self, url: &str) -> ProcessorResult<Option<PathBuf>> {
        let parsed =
            Url::parse(url).map_err(|err| ProcessorError::transfer(url, format!("invalid url: {err}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(None),
            "file" if self.allow_file_urls => parsed
                .to_file_path()
                .map(Some)
                .map_err(|_| ProcessorError::transfer(url, "invalid file url")),
            scheme => Err(ProcessorError::transfer(
                url,
                format!("unsupported scheme `{scheme}`"),
            )),
        }
    }

    async fn copy_local(
        &self,
        url: &str,
        source: &Path,
        destination: &Path,
        progress: &ProgressTracker,
    ) -> ProcessorResult<()> {
        let mut input = fs::File::open(source)
            .await
            .map_err(|err| ProcessorError::transfer(url, err))?;
        let total = input
            .metadata()
            .await
            .map(|metadata| metadata.len())
            .unwrap_or(0);
        let mut output = create_file(destination).await?;
        let mut buffer = vec![0u8; LOCAL_CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let read = input
                .read(&mut buffer)
                .await
                .map_err(|err| ProcessorError::transfer(url, err))?;
            if read == 0 {
                break;
            }
            output
                .write_all(&buffer[..read])
                .await
                .map_err(|source| ProcessorError::Io {
                    path: destination.to_path_buf(),
                    source,
                })?;
            written += read as u64;
            progress.report(written, total);
        }
        output.flush().await.map_err(|source| ProcessorError::Io {
            path: destination.to_path_buf(),
            source,
        })
    }
}

async fn create_file(path: &Path) -> ProcessorResult<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| ProcessorError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    fs::File::create(path)
        .await
        .map_err(|source| ProcessorError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file_url(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    #[tokio::test]
    async fn copies_local_file_with_progress() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let payload = vec![7u8; LOCAL_CHUNK_SIZE * 2 + 17];
        std::fs::write(&source, &payload).unwrap();
        let destination = dir.path().join("out/clip.mp4");

        let fetcher = SegmentFetcher::new(Client::new()).with_file_urls(true);
        let tracker = ProgressTracker::detached();
        let written = fetcher
            .fetch(&file_url(&source), &destination, &tracker)
            .await
            .unwrap();

        assert_eq!(written, destination);
        assert_eq!(std::fs::read(&destination).unwrap(), payload);
        let last = tracker.latest();
        assert_eq!(last.done, payload.len() as u64);
        assert_eq!(last.total, payload.len() as u64);
    }

    #[tokio::test]
    async fn file_urls_are_refused_unless_enabled() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("secret.txt");
        std::fs::write(&source, "nope").unwrap();
        let fetcher = SegmentFetcher::new(Client::new());
        let err = fetcher
            .fetch(
                &file_url(&source),
                &dir.path().join("copy.txt"),
                &ProgressTracker::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Transfer { .. }));
        assert!(err.to_string().contains("unsupported scheme `file`"));
        assert!(!dir.path().join("copy.txt").exists());
    }

    #[tokio::test]
    async fn missing_local_source_is_a_transfer_error() {
        let dir = tempdir().unwrap();
        let fetcher = SegmentFetcher::new(Client::new()).with_file_urls(true);
        let err = fetcher
            .fetch_text(&file_url(&dir.path().join("absent.m3u8")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Transfer { .. }));
    }

    #[tokio::test]
    async fn garbage_url_is_a_transfer_error() {
        let dir = tempdir().unwrap();
        let fetcher = SegmentFetcher::new(Client::new());
        let err = fetcher
            .fetch(
                "not a url",
                &dir.path().join("x"),
                &ProgressTracker::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Transfer { .. }));
    }
}
