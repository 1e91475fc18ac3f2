use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use super::error::ProcessorResult;
use super::fetcher::SegmentFetcher;
use super::progress::ProgressTracker;
use super::types::SegmentReference;

/// Raw playlist text together with the URL it came from.
#[derive(Debug, Clone)]
pub struct PlaylistDocument {
    pub url: String,
    pub contents: String,
}

impl PlaylistDocument {
    pub fn new(url: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            contents: contents.into(),
        }
    }

    /// Every non-empty, non-`#` line in file order, resolved against the playlist URL.
    pub fn segments(&self) -> Vec<SegmentReference> {
        self.contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .enumerate()
            .map(|(index, line)| SegmentReference {
                index,
                url: resolve_reference(&self.url, line),
            })
            .collect()
    }
}

/// Join a playlist line onto the playlist's directory.
///
/// Lines with a scheme are returned untouched. Anything else is appended to
/// the playlist URL with its last path component removed; `../`, `/abs` and
/// `//host` forms are not interpreted.
pub fn resolve_reference(playlist_url: &str, reference: &str) -> String {
    if Url::parse(reference).is_ok() {
        return reference.to_string();
    }
    let base = playlist_url
        .rsplit_once('/')
        .map(|(base, _)| base)
        .unwrap_or(playlist_url);
    format!("{base}/{reference}")
}

/// Downloads a playlist and each of its segments, one after another.
#[derive(Debug, Clone)]
pub struct PlaylistResolver {
    fetcher: SegmentFetcher,
}

impl PlaylistResolver {
    pub fn new(fetcher: SegmentFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn load(&self, playlist_url: &str) -> ProcessorResult<PlaylistDocument> {
        let contents = self.fetcher.fetch_text(playlist_url).await?;
        Ok(PlaylistDocument::new(playlist_url, contents))
    }

    /// Fetch every segment into `scratch_dir`, returning local paths in playlist order.
    ///
    /// Stops at the first failed segment. An empty playlist yields an empty list.
    pub async fn resolve(
        &self,
        playlist_url: &str,
        scratch_dir: &Path,
        progress: &ProgressTracker,
    ) -> ProcessorResult<Vec<PathBuf>> {
        let document = self.load(playlist_url).await?;
        let segments = document.segments();
        let total = segments.len() as u64;
        info!(url = %playlist_url, segments = total, "playlist parsed");

        let mut local_paths = Vec::with_capacity(segments.len());
        let segment_progress = ProgressTracker::detached();
        for segment in &segments {
            let destination = scratch_dir.join(segment.file_name(segments.len()));
            self.fetcher
                .fetch(&segment.url, &destination, &segment_progress)
                .await?;
            debug!(index = segment.index, url = %segment.url, "segment fetched");
            local_paths.push(destination);
            progress.report(local_paths.len() as u64, total);
        }
        Ok(local_paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use tempfile::tempdir;

    use crate::processor::error::ProcessorError;

    #[test]
    fn relative_references_join_the_playlist_directory() {
        let document = PlaylistDocument::new(
            "http://h/p/list.m3u8",
            "#EXTM3U\nseg0.ts\nhttp://other/seg1.ts\n\n#EXTINF:4.0,\nseg2.ts\n",
        );
        let urls: Vec<String> = document.segments().into_iter().map(|s| s.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://h/p/seg0.ts",
                "http://other/seg1.ts",
                "http://h/p/seg2.ts"
            ]
        );
    }

    #[test]
    fn indices_follow_reference_lines_only() {
        let document = PlaylistDocument::new(
            "https://cdn/v/index.m3u8",
            "#EXTM3U\r\n#EXT-X-VERSION:3\r\n  a.ts  \r\n#comment\r\nb.ts\r\n",
        );
        let segments = document.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].index, 0);
        assert_eq!(segments[0].url, "https://cdn/v/a.ts");
        assert_eq!(segments[1].index, 1);
        assert_eq!(segments[1].url, "https://cdn/v/b.ts");
    }

    #[test]
    fn dot_dot_references_are_not_collapsed() {
        assert_eq!(
            resolve_reference("http://h/p/q/list.m3u8", "../seg.ts"),
            "http://h/p/q/../seg.ts"
        );
        assert_eq!(
            resolve_reference("http://h/p/list.m3u8", "/abs/seg.ts"),
            "http://h/p//abs/seg.ts"
        );
    }

    #[test]
    fn comment_only_playlist_has_no_segments() {
        let document = PlaylistDocument::new("http://h/list.m3u8", "#EXTM3U\n#EXT-X-ENDLIST\n\n");
        assert!(document.segments().is_empty());
    }

    #[tokio::test]
    async fn resolves_local_playlist_in_order() {
        let fixtures = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        for index in 0..3 {
            std::fs::write(
                fixtures.path().join(format!("part{index}.ts")),
                format!("SEGMENT {index}\n"),
            )
            .unwrap();
        }
        let playlist = fixtures.path().join("media.m3u8");
        std::fs::write(&playlist, "#EXTM3U\npart0.ts\npart1.ts\npart2.ts\n").unwrap();
        let url = Url::from_file_path(&playlist).unwrap().to_string();

        let resolver =
            PlaylistResolver::new(SegmentFetcher::new(Client::new()).with_file_urls(true));
        let (tracker, receiver) = ProgressTracker::channel();
        let paths = resolver
            .resolve(&url, scratch.path(), &tracker)
            .await
            .unwrap();

        assert_eq!(paths.len(), 3);
        for (index, path) in paths.iter().enumerate() {
            assert_eq!(
                path.file_name().unwrap().to_string_lossy(),
                format!("seg_{index:05}.ts")
            );
            assert_eq!(
                std::fs::read_to_string(path).unwrap(),
                format!("SEGMENT {index}\n")
            );
        }
        assert_eq!(receiver.borrow().done, 3);
        assert_eq!(receiver.borrow().total, 3);
    }

    #[tokio::test]
    async fn stops_at_first_missing_segment() {
        let fixtures = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        std::fs::write(fixtures.path().join("part0.ts"), "zero").unwrap();
        std::fs::write(fixtures.path().join("part2.ts"), "two").unwrap();
        let playlist = fixtures.path().join("media.m3u8");
        std::fs::write(&playlist, "part0.ts\npart1.ts\npart2.ts\n").unwrap();
        let url = Url::from_file_path(&playlist).unwrap().to_string();

        let resolver =
            PlaylistResolver::new(SegmentFetcher::new(Client::new()).with_file_urls(true));
        let tracker = ProgressTracker::detached();
        let err = resolver
            .resolve(&url, scratch.path(), &tracker)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Transfer { ref url, .. } if url.ends_with("part1.ts")));
        assert!(scratch.path().join("seg_00000.ts").exists());
        assert!(!scratch.path().join("seg_00002.ts").exists());
        assert_eq!(tracker.latest().done, 1);
    }
}
