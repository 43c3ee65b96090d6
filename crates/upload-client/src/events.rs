//! Per-task upload state published to subscribers.

use common::types::UploadTaskId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle of an upload task.
///
/// `Success`, `Error`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Initiating,
    Uploading,
    Success,
    Error,
    Cancelled,
}

impl UploadStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Success | UploadStatus::Error | UploadStatus::Cancelled
        )
    }
}

/// Point-in-time view of one upload task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSnapshot {
    pub task_id: UploadTaskId,
    pub file_name: String,
    pub status: UploadStatus,
    /// Integer percent of `total_bytes` confirmed by the server.
    pub progress: u8,
    pub bytes_confirmed: u64,
    pub total_bytes: u64,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadSnapshot {
    /// Fresh snapshot for a task that has not started.
    #[must_use]
    pub fn pending(task_id: UploadTaskId, file_name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            task_id,
            file_name: file_name.into(),
            status: UploadStatus::Pending,
            progress: 0,
            bytes_confirmed: 0,
            total_bytes,
            retry_count: 0,
            error: None,
        }
    }

    /// Record `bytes_confirmed` and recompute `progress`.
    pub fn set_confirmed(&mut self, bytes_confirmed: u64) {
        self.bytes_confirmed = bytes_confirmed;
        self.progress = percent(bytes_confirmed, self.total_bytes);
    }
}

fn percent(confirmed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = u128::from(confirmed.min(total)) * 100 / u128::from(total);
    u8::try_from(pct).unwrap_or(100)
}

/// Receives every snapshot the uploader publishes, in order.
pub trait SnapshotSink: Send + Sync {
    fn publish(&self, snapshot: &UploadSnapshot);
}

/// Watch channels keep only the latest snapshot; late subscribers see the
/// current state.
impl SnapshotSink for watch::Sender<UploadSnapshot> {
    fn publish(&self, snapshot: &UploadSnapshot) {
        self.send_replace(snapshot.clone());
    }
}

/// Sink that keeps every snapshot, for asserting on full transition
/// sequences.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    snapshots: std::sync::Mutex<Vec<UploadSnapshot>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl RecordingSink {
    pub fn snapshots(&self) -> Vec<UploadSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    /// Distinct progress values in publication order.
    pub fn progress_steps(&self) -> Vec<u8> {
        let mut steps: Vec<u8> = Vec::new();
        for snapshot in self.snapshots() {
            if steps.last() != Some(&snapshot.progress) {
                steps.push(snapshot.progress);
            }
        }
        steps
    }

    pub fn statuses(&self) -> Vec<UploadStatus> {
        let mut statuses: Vec<UploadStatus> = Vec::new();
        for snapshot in self.snapshots() {
            if statuses.last() != Some(&snapshot.status) {
                statuses.push(snapshot.status);
            }
        }
        statuses
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl SnapshotSink for RecordingSink {
    fn publish(&self, snapshot: &UploadSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}
