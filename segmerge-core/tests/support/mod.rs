#![allow(dead_code)]

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use segmerge_core::processor::CommandExecutor;
use segmerge_core::{ChatError, ChatResult, IncomingMessage, ReplyHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    pub delay: Duration,
    /// `Content-Length` to announce when it differs from the body sent.
    pub announced_length: Option<usize>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
            announced_length: None,
        }
    }

    /// Announce `length` bytes, send only the body, then hang up.
    pub fn cut_short(mut self, length: usize) -> Self {
        self.announced_length = Some(length);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// Serves canned responses keyed by request path; anything else is a 404.
pub struct HttpFixture {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpFixture {
    pub async fn start<I, P>(routes: I) -> Self
    where
        I: IntoIterator<Item = (P, Route)>,
        P: Into<String>,
    {
        let routes: Arc<HashMap<String, Route>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, route)| (path.into(), route))
                .collect(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = respond(stream, &routes, &recorded).await;
                });
            }
        });
        Self { base_url, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.path).collect()
    }
}

async fn respond(
    mut stream: TcpStream,
    routes: &HashMap<String, Route>,
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buffer[head_end..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    recorded.lock().unwrap().push(RecordedRequest {
        method,
        path: path.clone(),
        body,
    });

    let route_key = path.split('?').next().unwrap_or_default();
    let route = routes.get(route_key).cloned().unwrap_or(Route {
        status: 404,
        body: b"not found".to_vec(),
        delay: Duration::ZERO,
        announced_length: None,
    });
    if !route.delay.is_zero() {
        tokio::time::sleep(route.delay).await;
    }
    let reason = if route.status == 200 { "OK" } else { "Error" };
    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        route.status,
        reason,
        route.announced_length.unwrap_or(route.body.len())
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&route.body).await?;
    stream.shutdown().await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Reply(String),
    Edit(String),
    Delete,
    Video {
        file_name: String,
        caption: String,
        bytes: Vec<u8>,
    },
}

/// An inbound message that records everything the pipeline sends back.
pub struct RecordingMessage {
    text: Option<String>,
    fail_upload: bool,
    events: Mutex<Vec<ChatEvent>>,
}

impl RecordingMessage {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            fail_upload: false,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn without_text() -> Self {
        Self {
            text: None,
            fail_upload: false,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Text of the most recent reply or edit.
    pub fn last_status(&self) -> Option<String> {
        self.events().into_iter().rev().find_map(|event| match event {
            ChatEvent::Reply(text) | ChatEvent::Edit(text) => Some(text),
            _ => None,
        })
    }

    pub fn videos(&self) -> Vec<ChatEvent> {
        self.events()
            .into_iter()
            .filter(|event| matches!(event, ChatEvent::Video { .. }))
            .collect()
    }
}

#[async_trait]
impl IncomingMessage for RecordingMessage {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    async fn reply_text(&self, text: &str) -> ChatResult<ReplyHandle> {
        let mut events = self.events.lock().unwrap();
        events.push(ChatEvent::Reply(text.to_string()));
        Ok(ReplyHandle {
            message_id: events.len() as i64,
        })
    }

    async fn edit_reply(&self, _reply: ReplyHandle, text: &str) -> ChatResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(ChatEvent::Edit(text.to_string()));
        Ok(())
    }

    async fn delete_reply(&self, _reply: ReplyHandle) -> ChatResult<()> {
        self.events.lock().unwrap().push(ChatEvent::Delete);
        Ok(())
    }

    async fn reply_video(&self, path: &Path, caption: &str) -> ChatResult<()> {
        if self.fail_upload {
            return Err(ChatError::Api {
                method: "sendVideo",
                description: "Request Entity Too Large".to_string(),
            });
        }
        let bytes = std::fs::read(path).map_err(|source| ChatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.events.lock().unwrap().push(ChatEvent::Video {
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            caption: caption.to_string(),
            bytes,
        });
        Ok(())
    }
}

/// Stands in for `ffmpeg -f concat -c copy` by appending the listed files.
#[derive(Default)]
pub struct ByteConcatExecutor {
    calls: Mutex<Vec<Vec<String>>>,
}

impl ByteConcatExecutor {
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandExecutor for ByteConcatExecutor {
    async fn run(&self, _program: &Path, args: &[String]) -> std::io::Result<Output> {
        self.calls.lock().unwrap().push(args.to_vec());
        let manifest_at = args.iter().position(|arg| arg == "-i").unwrap() + 1;
        let manifest = std::fs::read_to_string(&args[manifest_at])?;
        let mut merged = Vec::new();
        for line in manifest.lines() {
            let listed = line
                .strip_prefix("file '")
                .and_then(|rest| rest.strip_suffix('\''))
                .unwrap();
            merged.extend(std::fs::read(PathBuf::from(listed))?);
        }
        std::fs::write(args.last().unwrap(), merged)?;
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

/// An ffmpeg that exits 1 with a demuxer complaint on stderr.
#[derive(Default)]
pub struct FailingExecutor {
    calls: Mutex<usize>,
}

impl FailingExecutor {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl CommandExecutor for FailingExecutor {
    async fn run(&self, _program: &Path, _args: &[String]) -> std::io::Result<Output> {
        *self.calls.lock().unwrap() += 1;
        Ok(Output {
            status: ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: b"seg_00001.ts: Invalid data found when processing input\n".to_vec(),
        })
    }
}
