use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use url::Url;

/// Playlist documents: scheme, anything without whitespace, `.m3u8`.
const PLAYLIST_PATTERN: &str = r"[^\s]+\.m3u8";

/// Direct media files, with an optional query string after the container suffix.
const DIRECT_PATTERN: &str = r"[^\s]+(?:\.mp4|\.mov|\.webm|\.mkv|\.avi|\.flv|\.ts)(?:\?[^\s]*)?";

const WEB_SCHEMES: &str = r"https?://";
const WEB_AND_FILE_SCHEMES: &str = r"(?:https?|file)://";

/// Container suffixes recognised on direct links.
pub const DIRECT_EXTENSIONS: [&str; 7] = ["mp4", "mov", "webm", "mkv", "avi", "flv", "ts"];

static WEB_PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
static LOCAL_PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();

fn compile(schemes: &str) -> [Regex; 2] {
    [
        Regex::new(&format!("{schemes}{PLAYLIST_PATTERN}")).expect("valid playlist regex"),
        Regex::new(&format!("{schemes}{DIRECT_PATTERN}")).expect("valid direct media regex"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Playlist,
    Direct,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Playlist => f.write_str("playlist"),
            MediaKind::Direct => f.write_str("direct"),
        }
    }
}

/// A chat message reduced to the one URL the pipeline will work on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRequest {
    url: String,
    kind: MediaKind,
}

impl MediaRequest {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_playlist(&self) -> bool {
        matches!(self.kind, MediaKind::Playlist)
    }

    /// Container extension of a direct link, `mp4` when the path carries none we know.
    pub fn container_extension(&self) -> &'static str {
        let path = Url::parse(&self.url)
            .map(|parsed| parsed.path().to_string())
            .unwrap_or_else(|_| self.url.clone());
        path.rsplit_once('.')
            .and_then(|(_, ext)| {
                DIRECT_EXTENSIONS
                    .iter()
                    .copied()
                    .find(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or("mp4")
    }
}

/// Extract at most one `http`/`https` media URL from free-form text.
///
/// A playlist match anywhere in the text wins over a direct file match, even
/// when the direct link appears first.
pub fn classify(text: &str) -> Option<MediaRequest> {
    find_request(WEB_PATTERNS.get_or_init(|| compile(WEB_SCHEMES)), text)
}

/// Like [`classify`], but `file://` links are candidates too.
pub fn classify_with_files(text: &str) -> Option<MediaRequest> {
    find_request(
        LOCAL_PATTERNS.get_or_init(|| compile(WEB_AND_FILE_SCHEMES)),
        text,
    )
}

fn find_request([playlist, direct]: &[Regex; 2], text: &str) -> Option<MediaRequest> {
    if let Some(found) = playlist.find(text) {
        return Some(MediaRequest {
            url: found.as_str().to_string(),
            kind: MediaKind::Playlist,
        });
    }
    direct.find(text).map(|found| MediaRequest {
        url: found.as_str().to_string(),
        kind: MediaKind::Direct,
    })
}
