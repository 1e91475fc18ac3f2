use std::path::Path;

use tokio::fs;

use super::error::{ProcessorError, ProcessorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed { size: u64 },
    Rejected { actual: u64, limit: u64 },
}

impl GateDecision {
    /// A file exactly at the limit is allowed.
    pub fn evaluate(size: u64, limit: u64) -> Self {
        if size > limit {
            GateDecision::Rejected {
                actual: size,
                limit,
            }
        } else {
            GateDecision::Allowed { size }
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed { .. })
    }
}

/// Measure `path` and compare it with the upload ceiling.
pub async fn gate(path: &Path, limit: u64) -> ProcessorResult<GateDecision> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|source| ProcessorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(GateDecision::evaluate(metadata.len(), limit))
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for candidate in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = candidate;
    }
    format!("{value:.2} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn limit_is_inclusive() {
        let limit = 2 * 1024 * 1024 * 1024;
        assert_eq!(
            GateDecision::evaluate(limit, limit),
            GateDecision::Allowed { size: limit }
        );
        assert_eq!(
            GateDecision::evaluate(limit + 1, limit),
            GateDecision::Rejected {
                actual: limit + 1,
                limit
            }
        );
    }

    #[tokio::test]
    async fn gate_measures_file_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output.mp4");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(gate(&path, 64).await.unwrap().is_allowed());
        assert_eq!(
            gate(&path, 63).await.unwrap(),
            GateDecision::Rejected {
                actual: 64,
                limit: 63
            }
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = gate(&dir.path().join("absent.mp4"), 10).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Io { .. }));
    }

    #[test]
    fn formats_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.00 GiB");
    }
}
