//! Resumable upload state machine.
//!
//! One task moves `pending → initiating → uploading → success | error`, or to
//! `cancelled` when its token fires. Chunks go out strictly in order. A chunk
//! failure bumps the retry count and triggers a status query; a dead session
//! is replaced by a fresh one and the file restarts from byte 0.

use crate::broker_client::SessionInitiator;
use crate::config::{ClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES};
use crate::errors::UploadError;
use crate::events::{SnapshotSink, UploadSnapshot, UploadStatus};
use crate::notifier::CompletionNotifier;
use crate::source::SequentialByteSource;
use crate::transport::{ChunkTransport, TransferStatus, RESUME_INCOMPLETE};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Tunables for one uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub chunk_size: u64,
    pub max_retries: u32,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl From<&ClientConfig> for UploadOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_retries: config.max_retries,
        }
    }
}

/// What to upload.
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub source: Arc<dyn SequentialByteSource>,
}

/// Drives upload tasks against a broker and a session transport.
#[derive(Clone)]
pub struct ResumableUploader {
    initiator: Arc<dyn SessionInitiator>,
    transport: Arc<dyn ChunkTransport>,
    notifier: Arc<dyn CompletionNotifier>,
    options: UploadOptions,
}

/// Result of one chunk PUT, after range validation.
enum ChunkOutcome {
    Advanced(u64),
    Complete,
    Failed(String),
}

/// Result of a status query.
enum Recovery {
    Resume(u64),
    Complete,
    SessionDead(u16),
}

impl ResumableUploader {
    pub fn new(
        initiator: Arc<dyn SessionInitiator>,
        transport: Arc<dyn ChunkTransport>,
        notifier: Arc<dyn CompletionNotifier>,
        options: UploadOptions,
    ) -> Self {
        Self {
            initiator,
            transport,
            notifier,
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> UploadOptions {
        self.options
    }

    /// Run one task to a terminal state.
    ///
    /// `snapshot` is the task's starting snapshot; every transition is
    /// published to `sink`. Returns the terminal snapshot. On success the
    /// notifier is spawned after the terminal snapshot is published.
    #[instrument(skip_all, fields(task_id = %snapshot.task_id, total = snapshot.total_bytes))]
    pub async fn run(
        &self,
        request: UploadRequest,
        mut snapshot: UploadSnapshot,
        sink: &dyn SnapshotSink,
        cancel: &CancellationToken,
    ) -> UploadSnapshot {
        let result = self
            .drive(&request, &mut snapshot, sink, cancel)
            .await;

        match result {
            Ok(()) => {
                snapshot.status = UploadStatus::Success;
                snapshot.retry_count = 0;
                snapshot.set_confirmed(snapshot.total_bytes);
                snapshot.error = None;
                sink.publish(&snapshot);
                info!(target: "client.uploader", file = %request.file_name, bytes = snapshot.total_bytes, "Upload complete");
                self.spawn_notification(request.file_name);
            }
            Err(UploadError::Cancelled) => {
                snapshot.status = UploadStatus::Cancelled;
                snapshot.error = Some(UploadError::Cancelled.to_string());
                sink.publish(&snapshot);
                info!(target: "client.uploader", file = %request.file_name, "Upload cancelled");
            }
            Err(err) => {
                snapshot.status = UploadStatus::Error;
                snapshot.error = Some(err.to_string());
                sink.publish(&snapshot);
                warn!(target: "client.uploader", file = %request.file_name, error = %err, "Upload failed");
            }
        }

        snapshot
    }

    async fn drive(
        &self,
        request: &UploadRequest,
        snapshot: &mut UploadSnapshot,
        sink: &dyn SnapshotSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let total = request.source.len();
        if total == 0 {
            return Err(UploadError::EmptySource);
        }
        if self.options.chunk_size == 0 {
            return Err(UploadError::Configuration(
                "chunk size must be positive".to_string(),
            ));
        }
        snapshot.total_bytes = total;

        snapshot.status = UploadStatus::Initiating;
        sink.publish(snapshot);
        let mut session_url = guarded(
            cancel,
            self.initiator.initiate(&request.file_name, &request.mime_type),
        )
        .await?;
        debug!(target: "client.uploader", "Session opened");

        snapshot.status = UploadStatus::Uploading;
        snapshot.set_confirmed(0);
        sink.publish(snapshot);

        while snapshot.bytes_confirmed < total {
            let start = snapshot.bytes_confirmed;
            let end = start.saturating_add(self.options.chunk_size).min(total);
            let chunk = request.source.read_range(start, end).await?;

            let outcome = match guarded(
                cancel,
                self.transport.put_chunk(&session_url, chunk, start, total),
            )
            .await
            {
                Ok(TransferStatus::Complete) => ChunkOutcome::Complete,
                Ok(TransferStatus::Resume { persisted: None }) => {
                    ChunkOutcome::Failed("308 without Range".to_string())
                }
                Ok(TransferStatus::Resume {
                    persisted: Some(persisted),
                }) if persisted <= start => ChunkOutcome::Failed(format!(
                    "server held {persisted} bytes after chunk at {start}"
                )),
                Ok(TransferStatus::Resume {
                    persisted: Some(persisted),
                }) if persisted <= total => ChunkOutcome::Advanced(persisted),
                Ok(TransferStatus::Resume {
                    persisted: Some(persisted),
                }) => ChunkOutcome::Failed(format!(
                    "server reported {persisted} bytes of {total}"
                )),
                Ok(TransferStatus::Rejected { status }) => {
                    ChunkOutcome::Failed(format!("unexpected status {status}"))
                }
                Err(UploadError::Network(reason)) => ChunkOutcome::Failed(reason),
                Err(err) => return Err(err),
            };

            match outcome {
                ChunkOutcome::Complete => {
                    snapshot.retry_count = 0;
                    snapshot.set_confirmed(total);
                    sink.publish(snapshot);
                }
                ChunkOutcome::Advanced(persisted) => {
                    snapshot.retry_count = 0;
                    snapshot.set_confirmed(persisted.max(snapshot.bytes_confirmed));
                    sink.publish(snapshot);
                    debug!(target: "client.uploader", confirmed = snapshot.bytes_confirmed, "Chunk accepted");
                }
                ChunkOutcome::Failed(reason) => {
                    snapshot.retry_count = snapshot.retry_count.saturating_add(1);
                    sink.publish(snapshot);
                    warn!(
                        target: "client.uploader",
                        start = start,
                        retry_count = snapshot.retry_count,
                        reason = %reason,
                        "Chunk failed"
                    );

                    if snapshot.retry_count > self.options.max_retries {
                        return Err(UploadError::RetryExhausted {
                            attempts: snapshot.retry_count,
                        });
                    }

                    match self.recover(&session_url, total, cancel).await? {
                        Recovery::Complete => {
                            snapshot.set_confirmed(total);
                            sink.publish(snapshot);
                        }
                        Recovery::Resume(persisted) => {
                            snapshot.set_confirmed(persisted.max(snapshot.bytes_confirmed));
                            sink.publish(snapshot);
                        }
                        Recovery::SessionDead(status) => {
                            warn!(target: "client.uploader", status = status, "Session lost, restarting upload");
                            session_url = guarded(
                                cancel,
                                self.initiator.initiate(&request.file_name, &request.mime_type),
                            )
                            .await?;
                            snapshot.set_confirmed(0);
                            sink.publish(snapshot);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Ask the session what it holds after a failed chunk.
    async fn recover(
        &self,
        session_url: &str,
        total: u64,
        cancel: &CancellationToken,
    ) -> Result<Recovery, UploadError> {
        let status = guarded(cancel, self.transport.query_status(session_url, total))
            .await
            .map_err(|err| match err {
                UploadError::Cancelled => UploadError::Cancelled,
                UploadError::Network(reason) => UploadError::Recovery(reason),
                other => UploadError::Recovery(other.to_string()),
            })?;

        Ok(match status {
            TransferStatus::Complete => Recovery::Complete,
            TransferStatus::Resume { persisted: None } => Recovery::Resume(0),
            TransferStatus::Resume {
                persisted: Some(persisted),
            } if persisted <= total => Recovery::Resume(persisted),
            TransferStatus::Resume { .. } => Recovery::SessionDead(RESUME_INCOMPLETE),
            TransferStatus::Rejected { status } => Recovery::SessionDead(status),
        })
    }

    fn spawn_notification(&self, file_name: String) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let outcome = notifier.notify(&file_name).await;
            if outcome.success {
                debug!(target: "client.notifier", file = %file_name, "Completion notification delivered");
            } else {
                warn!(
                    target: "client.notifier",
                    file = %file_name,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Completion notification failed"
                );
            }
        });
    }
}

/// Run `call` unless the task is already cancelled.
///
/// A cancellation that fires while `call` is in flight lets it finish; its
/// result is then discarded.
async fn guarded<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, UploadError>>,
) -> Result<T, UploadError> {
    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }
    let result = call.await;
    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::broker_client::mock::MockInitiator;
    use crate::events::RecordingSink;
    use crate::notifier::mock::MockNotifier;
    use crate::source::MemorySource;
    use crate::transport::mock::{Scripted, ScriptedTransport, TransportCall};
    use common::types::UploadTaskId;
    use std::time::Duration;

    const SESSION_A: &str = "https://storage.example/upload/session/a";
    const SESSION_B: &str = "https://storage.example/upload/session/b";

    struct Harness {
        initiator: Arc<MockInitiator>,
        transport: Arc<ScriptedTransport>,
        notifier: Arc<MockNotifier>,
        uploader: ResumableUploader,
    }

    fn harness(initiator: MockInitiator, transport: ScriptedTransport, notifier: MockNotifier) -> Harness {
        let initiator = Arc::new(initiator);
        let transport = Arc::new(transport);
        let notifier = Arc::new(notifier);
        let uploader = ResumableUploader::new(
            initiator.clone(),
            transport.clone(),
            notifier.clone(),
            UploadOptions {
                chunk_size: 10,
                max_retries: 5,
            },
        );
        Harness {
            initiator,
            transport,
            notifier,
            uploader,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn upload(h: &Harness, len: usize, sink: &RecordingSink) -> UploadSnapshot {
        let request = UploadRequest {
            file_name: "capture.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            source: Arc::new(MemorySource::new(payload(len))),
        };
        let snapshot = UploadSnapshot::pending(UploadTaskId::new(), "capture.bin", len as u64);
        h.uploader
            .run(request, snapshot, sink, &CancellationToken::new())
            .await
    }

    fn failure() -> Scripted {
        Scripted::Respond(TransferStatus::Rejected { status: 503 })
    }

    #[tokio::test]
    async fn test_three_chunk_upload() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::new(),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Success);
        assert_eq!(done.bytes_confirmed, 25);
        assert_eq!(
            h.transport.puts().await,
            vec![
                (SESSION_A.to_string(), 0, 10),
                (SESSION_A.to_string(), 10, 20),
                (SESSION_A.to_string(), 20, 25),
            ]
        );
        assert_eq!(sink.progress_steps(), vec![0, 40, 80, 100]);
        assert_eq!(
            sink.statuses(),
            vec![
                UploadStatus::Initiating,
                UploadStatus::Uploading,
                UploadStatus::Success
            ]
        );
        assert_eq!(h.initiator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        // Chunk 2 fails twice, the third attempt succeeds.
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_puts(vec![Scripted::Simulate, failure(), failure()]),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Success);
        assert_eq!(done.retry_count, 0);
        let peak = sink.snapshots().iter().map(|s| s.retry_count).max().unwrap();
        assert_eq!(peak, 2);

        let puts = h.transport.puts().await;
        assert_eq!(puts.len(), 5);
        assert_eq!(puts[1], puts[2]);
        assert_eq!(puts[2], puts[3]);
        assert_eq!(puts[4], (SESSION_A.to_string(), 20, 25));
        assert_eq!(h.transport.persisted(SESSION_A).await, 25);
    }

    #[tokio::test]
    async fn test_dead_session_restarts_from_zero() {
        let h = harness(
            MockInitiator::with_sessions(&[SESSION_A, SESSION_B]),
            ScriptedTransport::with_scripts(
                vec![Scripted::Simulate, failure()],
                vec![Scripted::Respond(TransferStatus::Rejected { status: 404 })],
            ),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Success);
        assert_eq!(h.initiator.call_count(), 2);
        assert_eq!(
            h.transport.puts().await,
            vec![
                (SESSION_A.to_string(), 0, 10),
                (SESSION_A.to_string(), 10, 20),
                (SESSION_B.to_string(), 0, 10),
                (SESSION_B.to_string(), 10, 20),
                (SESSION_B.to_string(), 20, 25),
            ]
        );
        // Progress drops back to 0 only through the session replacement.
        assert_eq!(sink.progress_steps(), vec![0, 40, 0, 40, 80, 100]);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_stops_all_calls() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_puts(vec![failure(); 20]),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Error);
        assert_eq!(
            done.error.as_deref(),
            Some("Upload failed after 6 consecutive attempts")
        );
        let calls = h.transport.calls().await;
        let puts = calls
            .iter()
            .filter(|c| matches!(c, TransportCall::Put { .. }))
            .count();
        let queries = calls.len() - puts;
        assert_eq!(puts, 6);
        assert_eq!(queries, 5);
        assert!(matches!(calls.last(), Some(TransportCall::Put { .. })));
        assert!(h.notifier.notified().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_retries_fails_on_first_error() {
        let initiator = Arc::new(MockInitiator::returning(SESSION_A));
        let transport = Arc::new(ScriptedTransport::with_puts(vec![failure()]));
        let uploader = ResumableUploader::new(
            initiator,
            transport.clone(),
            Arc::new(MockNotifier::delivering()),
            UploadOptions {
                chunk_size: 10,
                max_retries: 0,
            },
        );
        let request = UploadRequest {
            file_name: "a".into(),
            mime_type: "b".into(),
            source: Arc::new(MemorySource::new(payload(5))),
        };

        let done = uploader
            .run(
                request,
                UploadSnapshot::pending(UploadTaskId::new(), "a", 5),
                &RecordingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(done.status, UploadStatus::Error);
        assert_eq!(transport.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_chunks_tile_file_for_many_sizes() {
        for (len, chunk) in [(1usize, 10u64), (10, 10), (11, 10), (100, 7), (64, 64), (65, 64)] {
            let initiator = Arc::new(MockInitiator::returning(SESSION_A));
            let transport = Arc::new(ScriptedTransport::new());
            let uploader = ResumableUploader::new(
                initiator,
                transport.clone(),
                Arc::new(MockNotifier::delivering()),
                UploadOptions {
                    chunk_size: chunk,
                    max_retries: 5,
                },
            );
            let sink = RecordingSink::default();
            let request = UploadRequest {
                file_name: "t".into(),
                mime_type: "application/octet-stream".into(),
                source: Arc::new(MemorySource::new(payload(len))),
            };

            let done = uploader
                .run(
                    request,
                    UploadSnapshot::pending(UploadTaskId::new(), "t", len as u64),
                    &sink,
                    &CancellationToken::new(),
                )
                .await;
            assert_eq!(done.status, UploadStatus::Success, "len {len} chunk {chunk}");

            let mut expected_start = 0;
            for (_, start, end) in transport.puts().await {
                assert_eq!(start, expected_start, "gap or overlap at {start}");
                assert!(end > start && end - start <= chunk);
                expected_start = end;
            }
            assert_eq!(expected_start, len as u64);

            let confirmed: Vec<u64> = sink.snapshots().iter().map(|s| s.bytes_confirmed).collect();
            assert!(confirmed.windows(2).all(|w| w[0] <= w[1]), "non-monotonic {confirmed:?}");
        }
    }

    #[tokio::test]
    async fn test_empty_source_makes_no_calls() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::new(),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 0, &sink).await;

        assert_eq!(done.status, UploadStatus::Error);
        assert_eq!(done.error, Some(UploadError::EmptySource.to_string()));
        assert_eq!(h.initiator.call_count(), 0);
        assert!(h.transport.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_initiation_failure_is_terminal() {
        let h = harness(
            MockInitiator::failing("Origin not allowed"),
            ScriptedTransport::new(),
            MockNotifier::delivering(),
        );

        let done = upload(&h, 25, &RecordingSink::default()).await;

        assert_eq!(done.status, UploadStatus::Error);
        assert_eq!(
            done.error.as_deref(),
            Some("Upload initiation failed: Origin not allowed")
        );
        assert!(h.transport.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_reinitiation_failure_is_terminal() {
        let h = harness(
            MockInitiator::with_outcomes(vec![
                Ok(SESSION_A.to_string()),
                Err(UploadError::Initiation("Upstream service unreachable".into())),
            ]),
            ScriptedTransport::with_scripts(
                vec![failure()],
                vec![Scripted::Respond(TransferStatus::Rejected { status: 410 })],
            ),
            MockNotifier::delivering(),
        );

        let done = upload(&h, 25, &RecordingSink::default()).await;

        assert_eq!(done.status, UploadStatus::Error);
        assert_eq!(
            done.error.as_deref(),
            Some("Upload initiation failed: Upstream service unreachable")
        );
        assert_eq!(h.transport.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_status_query_transport_error_is_recovery_error() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_scripts(
                vec![Scripted::Fail(UploadError::Network("connection reset".into()))],
                vec![Scripted::Fail(UploadError::Network("connection refused".into()))],
            ),
            MockNotifier::delivering(),
        );

        let done = upload(&h, 25, &RecordingSink::default()).await;

        assert_eq!(done.status, UploadStatus::Error);
        assert_eq!(
            done.error.as_deref(),
            Some("Upload recovery failed: connection refused")
        );
        assert_eq!(h.transport.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_recovery_resumes_from_reported_offset() {
        // First chunk lands server-side but the response is lost.
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_scripts(
                vec![Scripted::Simulate, Scripted::Lost],
                vec![],
            ),
            MockNotifier::delivering(),
        );

        let done = upload(&h, 25, &RecordingSink::default()).await;

        assert_eq!(done.status, UploadStatus::Success);
        assert_eq!(
            h.transport.puts().await.last().cloned(),
            Some((SESSION_A.to_string(), 20, 25))
        );
    }

    #[tokio::test]
    async fn test_recovery_reporting_complete_finishes() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_scripts(
                vec![failure()],
                vec![Scripted::Respond(TransferStatus::Complete)],
            ),
            MockNotifier::delivering(),
        );

        let done = upload(&h, 25, &RecordingSink::default()).await;

        assert_eq!(done.status, UploadStatus::Success);
        assert_eq!(done.progress, 100);
        assert_eq!(h.transport.puts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_308_without_range_counts_as_failure() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_puts(vec![
                failure(),
                Scripted::Respond(TransferStatus::Resume { persisted: None }),
            ]),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Success);
        let puts = h.transport.puts().await;
        assert_eq!(puts[0].1, 0);
        assert_eq!(puts[1].1, 0);
        assert_eq!(puts[2].1, 0);
        let retries: Vec<u32> = sink.snapshots().iter().map(|s| s.retry_count).collect();
        assert_eq!(retries.iter().max(), Some(&2));
        assert_eq!(retries.last(), Some(&0));
        let queries = h
            .transport
            .calls()
            .await
            .iter()
            .filter(|c| matches!(c, TransportCall::Query { .. }))
            .count();
        assert_eq!(queries, 2);
        // Bare 308 status answers keep the live session.
        assert_eq!(h.initiator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_bare_308_exhausts_retries() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_puts(vec![
                Scripted::Respond(TransferStatus::Resume { persisted: None });
                1000
            ]),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Error);
        assert_eq!(
            done.error.as_deref(),
            Some("Upload failed after 6 consecutive attempts")
        );
        assert_eq!(h.transport.puts().await.len(), 6);
        assert_eq!(done.retry_count, 6);
    }

    #[tokio::test]
    async fn test_308_without_new_bytes_counts_as_failure() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_puts(vec![
                Scripted::Simulate,
                Scripted::Respond(TransferStatus::Resume {
                    persisted: Some(10),
                }),
            ]),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Success);
        assert!(sink.snapshots().iter().any(|s| s.retry_count == 1));
        let starts: Vec<u64> = h.transport.puts().await.iter().map(|p| p.1).collect();
        assert_eq!(starts, vec![0, 10, 10, 20]);
    }

    #[tokio::test]
    async fn test_malformed_range_takes_retry_path() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_puts(vec![Scripted::Respond(TransferStatus::Rejected {
                status: 308,
            })]),
            MockNotifier::delivering(),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Success);
        assert!(sink.snapshots().iter().any(|s| s.retry_count == 1));
        assert!(h
            .transport
            .calls()
            .await
            .iter()
            .any(|c| matches!(c, TransportCall::Query { .. })));
    }

    #[tokio::test]
    async fn test_notifier_failure_keeps_success() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::new(),
            MockNotifier::failing("collaborator down"),
        );
        let sink = RecordingSink::default();

        let done = upload(&h, 25, &sink).await;

        assert_eq!(done.status, UploadStatus::Success);
        let notified = tokio::time::timeout(Duration::from_secs(2), h.notifier.wait_for(1))
            .await
            .unwrap();
        assert_eq!(notified, vec!["capture.bin".to_string()]);
        assert_eq!(sink.snapshots().last().unwrap().status, UploadStatus::Success);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::new(),
            MockNotifier::delivering(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = UploadRequest {
            file_name: "a".into(),
            mime_type: "b".into(),
            source: Arc::new(MemorySource::new(payload(25))),
        };
        let done = h
            .uploader
            .run(
                request,
                UploadSnapshot::pending(UploadTaskId::new(), "a", 25),
                &RecordingSink::default(),
                &cancel,
            )
            .await;

        assert_eq!(done.status, UploadStatus::Cancelled);
        assert_eq!(h.initiator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_response() {
        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::with_puts(vec![Scripted::Delayed(Duration::from_millis(200))]),
            MockNotifier::delivering(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let request = UploadRequest {
            file_name: "a".into(),
            mime_type: "b".into(),
            source: Arc::new(MemorySource::new(payload(25))),
        };
        let done = h
            .uploader
            .run(
                request,
                UploadSnapshot::pending(UploadTaskId::new(), "a", 25),
                &RecordingSink::default(),
                &cancel,
            )
            .await;

        assert_eq!(done.status, UploadStatus::Cancelled);
        assert_eq!(done.bytes_confirmed, 0);
        // The in-flight PUT completed server-side; nothing followed it.
        assert_eq!(h.transport.calls().await.len(), 1);
        assert_eq!(h.transport.persisted(SESSION_A).await, 10);
        assert!(h.notifier.notified().await.is_empty());
    }

    #[tokio::test]
    async fn test_source_read_failure_is_terminal() {
        struct BrokenSource;

        #[async_trait::async_trait]
        impl SequentialByteSource for BrokenSource {
            fn len(&self) -> u64 {
                25
            }

            async fn read_range(&self, _start: u64, _end: u64) -> Result<bytes::Bytes, UploadError> {
                Err(UploadError::Source("disk detached".into()))
            }
        }

        let h = harness(
            MockInitiator::returning(SESSION_A),
            ScriptedTransport::new(),
            MockNotifier::delivering(),
        );
        let request = UploadRequest {
            file_name: "a".into(),
            mime_type: "b".into(),
            source: Arc::new(BrokenSource),
        };

        let done = h
            .uploader
            .run(
                request,
                UploadSnapshot::pending(UploadTaskId::new(), "a", 25),
                &RecordingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(done.status, UploadStatus::Error);
        assert_eq!(done.error.as_deref(), Some("Failed to read source: disk detached"));
        assert!(h.transport.calls().await.is_empty());
    }
}
