//! Upload queue.
//!
//! Each enqueued file runs as its own tokio task. Tasks share nothing but the
//! uploader's collaborators; their state is observable through watch channels.

use crate::events::{UploadSnapshot, UploadStatus};
use crate::source::SequentialByteSource;
use crate::uploader::{ResumableUploader, UploadRequest};
use common::types::UploadTaskId;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct QueuedTask {
    id: UploadTaskId,
    snapshots: watch::Receiver<UploadSnapshot>,
    cancel: CancellationToken,
}

/// Handle to one enqueued upload.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    id: UploadTaskId,
    snapshots: watch::Receiver<UploadSnapshot>,
    cancel: CancellationToken,
}

impl UploadHandle {
    #[must_use]
    pub fn id(&self) -> UploadTaskId {
        self.id
    }

    /// Receiver for every state change of this task.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.snapshots.clone()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> UploadSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Wait for the task's terminal snapshot.
    pub async fn wait(&self) -> UploadSnapshot {
        let mut receiver = self.snapshots.clone();
        let terminal = match receiver.wait_for(|s| s.status.is_terminal()).await {
            Ok(snapshot) => Some(snapshot.clone()),
            Err(_) => None,
        };
        // The task ended; its last published snapshot is final.
        terminal.unwrap_or_else(|| receiver.borrow().clone())
    }

    /// Stop the task before its next request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Queue of concurrently running uploads.
pub struct UploadQueue {
    uploader: ResumableUploader,
    tasks: RwLock<Vec<QueuedTask>>,
}

impl UploadQueue {
    pub fn new(uploader: ResumableUploader) -> Self {
        Self {
            uploader,
            tasks: RwLock::new(Vec::new()),
        }
    }

    /// Start uploading `source` as `file_name`.
    pub async fn enqueue(
        &self,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        source: Arc<dyn SequentialByteSource>,
    ) -> UploadHandle {
        let id = UploadTaskId::new();
        let file_name = file_name.into();
        let initial = UploadSnapshot::pending(id, file_name.clone(), source.len());
        let (sender, receiver) = watch::channel(initial.clone());
        let cancel = CancellationToken::new();

        let request = UploadRequest {
            file_name,
            mime_type: mime_type.into(),
            source,
        };

        info!(target: "client.queue", task_id = %id, file = %request.file_name, bytes = initial.total_bytes, "Upload enqueued");

        let uploader = self.uploader.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let done = uploader.run(request, initial, &sender, &task_cancel).await;
            debug!(target: "client.queue", task_id = %done.task_id, status = ?done.status, "Upload task finished");
        });

        self.tasks.write().await.push(QueuedTask {
            id,
            snapshots: receiver.clone(),
            cancel: cancel.clone(),
        });

        UploadHandle {
            id,
            snapshots: receiver,
            cancel,
        }
    }

    /// Cancel and forget task `id`. Returns whether it was queued.
    pub async fn remove(&self, id: UploadTaskId) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(pos) = tasks.iter().position(|t| t.id == id) else {
            return false;
        };
        let task = tasks.remove(pos);
        task.cancel.cancel();
        info!(target: "client.queue", task_id = %id, "Upload removed");
        true
    }

    /// Current snapshot of every queued task, in enqueue order.
    pub async fn snapshots(&self) -> Vec<UploadSnapshot> {
        self.tasks
            .read()
            .await
            .iter()
            .map(|t| t.snapshots.borrow().clone())
            .collect()
    }

    /// Number of tasks not yet terminal.
    pub async fn active(&self) -> usize {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|t| !t.snapshots.borrow().status.is_terminal())
            .count()
    }

    /// Whether any task has reached `status`.
    pub async fn any_with_status(&self, status: UploadStatus) -> bool {
        self.tasks
            .read()
            .await
            .iter()
            .any(|t| t.snapshots.borrow().status == status)
    }
}
