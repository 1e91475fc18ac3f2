use std::sync::Arc;

use tokio::sync::watch;

use super::types::ProgressEvent;

/// Producer side of a per-phase progress channel.
///
/// Only the latest event is kept; the orchestrator samples it on its own
/// cadence, so bursts of chunk writes collapse into one status edit.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    sender: Arc<watch::Sender<ProgressEvent>>,
}

impl ProgressTracker {
    pub fn channel() -> (Self, watch::Receiver<ProgressEvent>) {
        let (sender, receiver) = watch::channel(ProgressEvent::default());
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    /// A tracker nobody listens to.
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn report(&self, done: u64, total: u64) {
        self.sender.send_if_modified(|current| {
            let next = ProgressEvent::new(done.max(current.done), total);
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    pub fn latest(&self) -> ProgressEvent {
        *self.sender.borrow()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStyle {
    Segments,
    Bytes,
}

impl ProgressStyle {
    pub fn render(&self, event: ProgressEvent) -> String {
        match self {
            ProgressStyle::Segments => {
                format!("📥 Downloading segments: {}/{}", event.done, event.total)
            }
            ProgressStyle::Bytes => format!("📥 Downloading: {}%", event.percent()),
        }
    }
}
