use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::FfmpegSection;

use super::error::{ProcessorError, ProcessorResult};
use super::types::MergedArtifact;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Joins ordered media files with the ffmpeg concat demuxer, copying streams as-is.
#[derive(Clone)]
pub struct Concatenator {
    ffmpeg: PathBuf,
    log_level: String,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for Concatenator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Concatenator")
            .field("ffmpeg", &self.ffmpeg)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Concatenator {
    pub fn new(config: &FfmpegSection) -> Self {
        Self {
            ffmpeg: config.path.clone(),
            log_level: config.log_level.clone(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    fn spawn_failed(&self, source: std::io::Error) -> ProcessorError {
        ProcessorError::Spawn {
            program: self.ffmpeg.clone(),
            source,
        }
    }

    /// Verify that the ffmpeg binary runs.
    pub async fn check(&self) -> ProcessorResult<String> {
        let args = vec!["-version".to_string()];
        let output = self
            .executor
            .run(&self.ffmpeg, &args)
            .await
            .map_err(|source| self.spawn_failed(source))?;
        if !output.status.success() {
            return Err(ProcessorError::Merge {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Concatenate `inputs` in order into `output`.
    ///
    /// A single input already in the output's container is adopted by rename.
    /// On success the manifest is removed; the inputs are left to the caller.
    pub async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> ProcessorResult<MergedArtifact> {
        match inputs {
            [] => {
                return Err(ProcessorError::EmptyMedia {
                    url: output.display().to_string(),
                })
            }
            [single] if same_extension(single, output) => {
                if single != output {
                    fs::rename(single, output)
                        .await
                        .map_err(|source| ProcessorError::Io {
                            path: output.to_path_buf(),
                            source,
                        })?;
                }
                debug!(path = %output.display(), "single input adopted without remux");
                return artifact(output).await;
            }
            _ => {}
        }

        let manifest = manifest_path(output);
        fs::write(&manifest, render_manifest(inputs))
            .await
            .map_err(|source| ProcessorError::Io {
                path: manifest.clone(),
                source,
            })?;

        let args = self.concat_args(&manifest, output);
        info!(inputs = inputs.len(), output = %output.display(), "running ffmpeg concat");
        let result = self
            .executor
            .run(&self.ffmpeg, &args)
            .await
            .map_err(|source| self.spawn_failed(source))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).to_string();
            warn!(status = ?result.status.code(), %stderr, "ffmpeg concat failed");
            return Err(ProcessorError::Merge {
                status: result.status.code(),
                stderr,
            });
        }

        if let Err(err) = fs::remove_file(&manifest).await {
            debug!(path = %manifest.display(), error = %err, "failed to remove concat manifest");
        }
        artifact(output).await
    }

    fn concat_args(&self, manifest: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            manifest.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

/// `<output>.txt`, next to the output file.
pub fn manifest_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".txt");
    PathBuf::from(name)
}

/// One `file '<path>'` line per input, quoting per the concat demuxer rules.
pub fn render_manifest(inputs: &[PathBuf]) -> String {
    let mut manifest = String::new();
    for input in inputs {
        let escaped = input.to_string_lossy().replace('\'', r"'\''");
        manifest.push_str(&format!("file '{escaped}'\n"));
    }
    manifest
}

fn same_extension(a: &Path, b: &Path) -> bool {
    match (a.extension(), b.extension()) {
        (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
        _ => false,
    }
}

async fn artifact(path: &Path) -> ProcessorResult<MergedArtifact> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|source| ProcessorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(MergedArtifact {
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
    })
}
