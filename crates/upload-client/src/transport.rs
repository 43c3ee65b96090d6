//! Chunk transport for resumable sessions.
//!
//! A session URL accepts `PUT`s carrying a `Content-Range`. The server answers
//! `308 Resume Incomplete` with a `Range: bytes=0-<n>` header while bytes are
//! still missing and `200`/`201` once the object is complete. A zero-byte
//! `PUT` with `Content-Range: bytes */<total>` asks for the current state
//! without sending data.

use crate::errors::UploadError;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{redirect, Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::{instrument, trace, warn};

/// Status code the protocol uses for "resume incomplete".
pub const RESUME_INCOMPLETE: u16 = 308;

/// What a session URL reported after a chunk PUT or status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Every byte is persisted (200/201).
    Complete,

    /// 308: more bytes are expected. `persisted` is the count of bytes held
    /// by the server, or `None` when the response had no `Range` header.
    Resume { persisted: Option<u64> },

    /// Any other status, including a 308 with an unparsable `Range`.
    Rejected { status: u16 },
}

/// Parse a `Range: bytes=0-<n>` header into the persisted byte count `n + 1`.
#[must_use]
pub fn parse_range(value: &str) -> Option<u64> {
    let (first, last) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    if first != "0" {
        return None;
    }
    last.parse::<u64>().ok()?.checked_add(1)
}

/// `Content-Range` for the half-open chunk `[start, end)`.
#[must_use]
pub fn chunk_content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {start}-{}/{total}", end.saturating_sub(1))
}

/// `Content-Range` for a status query.
#[must_use]
pub fn status_content_range(total: u64) -> String {
    format!("bytes */{total}")
}

/// Moves chunks to a session URL.
#[async_trait::async_trait]
pub trait ChunkTransport: Send + Sync {
    /// PUT `chunk` as bytes `[start, start + chunk.len())` of a `total`-byte
    /// object.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Network` on transport failure or deadline expiry.
    async fn put_chunk(
        &self,
        session_url: &str,
        chunk: Bytes,
        start: u64,
        total: u64,
    ) -> Result<TransferStatus, UploadError>;

    /// Ask the session how many bytes it holds.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Network` on transport failure or deadline expiry.
    async fn query_status(&self, session_url: &str, total: u64)
        -> Result<TransferStatus, UploadError>;
}

/// [`ChunkTransport`] over HTTP with a per-request deadline.
#[derive(Debug, Clone)]
pub struct HttpChunkTransport {
    http_client: Client,
    deadline: Duration,
}

impl HttpChunkTransport {
    /// Create a transport whose requests expire after `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Configuration` if the HTTP client fails to build.
    pub fn new(deadline: Duration) -> Result<Self, UploadError> {
        // 308 here means "resume incomplete", never a redirect to follow.
        let http_client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| UploadError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            deadline,
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<TransferStatus, UploadError> {
        let response = tokio::time::timeout(self.deadline, request.send())
            .await
            .map_err(|_| {
                warn!(target: "client.transport", deadline_secs = self.deadline.as_secs(), "Session request deadline exceeded");
                UploadError::Network(format!(
                    "deadline of {}s exceeded",
                    self.deadline.as_secs()
                ))
            })?
            .map_err(|e| {
                warn!(target: "client.transport", error = %e, "Session request failed");
                UploadError::Network(e.to_string())
            })?;

        Ok(classify(&response))
    }
}

fn classify(response: &Response) -> TransferStatus {
    let status = response.status();
    if status == StatusCode::OK || status == StatusCode::CREATED {
        return TransferStatus::Complete;
    }
    if status.as_u16() != RESUME_INCOMPLETE {
        return TransferStatus::Rejected {
            status: status.as_u16(),
        };
    }

    match response.headers().get(RANGE) {
        None => TransferStatus::Resume { persisted: None },
        Some(value) => match value.to_str().ok().and_then(parse_range) {
            Some(persisted) => TransferStatus::Resume {
                persisted: Some(persisted),
            },
            None => {
                warn!(target: "client.transport", range = ?value, "Unparsable Range header on 308");
                TransferStatus::Rejected {
                    status: RESUME_INCOMPLETE,
                }
            }
        },
    }
}

#[async_trait::async_trait]
impl ChunkTransport for HttpChunkTransport {
    #[instrument(skip_all, fields(start = start, len = chunk.len(), total = total))]
    async fn put_chunk(
        &self,
        session_url: &str,
        chunk: Bytes,
        start: u64,
        total: u64,
    ) -> Result<TransferStatus, UploadError> {
        let end = start + chunk.len() as u64;
        let content_range = chunk_content_range(start, end, total);
        trace!(target: "client.transport", content_range = %content_range, "PUT chunk");

        let request = self
            .http_client
            .put(session_url)
            .header(CONTENT_RANGE, content_range)
            .body(chunk);
        self.send(request).await
    }

    #[instrument(skip_all, fields(total = total))]
    async fn query_status(
        &self,
        session_url: &str,
        total: u64,
    ) -> Result<TransferStatus, UploadError> {
        let request = self
            .http_client
            .put(session_url)
            .header(CONTENT_RANGE, status_content_range(total))
            .header(CONTENT_LENGTH, 0);
        self.send(request).await
    }
}

/// Scripted transport module for testing.
pub mod mock {

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use tokio::sync::Mutex;

    /// One scripted reaction to a transport call.
    #[derive(Debug, Clone)]
    pub enum Scripted {
        /// Behave like a correct server.
        Simulate,
        /// Sleep, then behave like a correct server.
        Delayed(Duration),
        /// Persist the chunk like a correct server, then fail as if the
        /// response never arrived.
        Lost,
        /// Return this status without touching server state.
        Respond(TransferStatus),
        /// Fail the call.
        Fail(UploadError),
    }

    /// A call the transport received.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TransportCall {
        Put {
            session_url: String,
            start: u64,
            end: u64,
            total: u64,
        },
        Query {
            session_url: String,
            total: u64,
        },
    }

    #[derive(Debug, Default)]
    struct State {
        puts: VecDeque<Scripted>,
        queries: VecDeque<Scripted>,
        persisted: HashMap<String, u64>,
        calls: Vec<TransportCall>,
    }

    /// Transport that simulates one server per session URL.
    ///
    /// Scripted reactions are consumed one per call; once a script runs out
    /// every call is simulated.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        state: Mutex<State>,
    }

    impl ScriptedTransport {
        /// Transport that always behaves like a correct server.
        pub fn new() -> Self {
            Self::default()
        }

        /// Script the next chunk PUTs.
        pub fn with_puts(puts: Vec<Scripted>) -> Self {
            Self::with_scripts(puts, vec![])
        }

        /// Script the next chunk PUTs and status queries.
        pub fn with_scripts(puts: Vec<Scripted>, queries: Vec<Scripted>) -> Self {
            Self {
                state: Mutex::new(State {
                    puts: puts.into(),
                    queries: queries.into(),
                    ..State::default()
                }),
            }
        }

        /// Every call received so far, in order.
        pub async fn calls(&self) -> Vec<TransportCall> {
            self.state.lock().await.calls.clone()
        }

        /// Chunk PUTs received so far as `(session_url, start, end)`.
        pub async fn puts(&self) -> Vec<(String, u64, u64)> {
            self.calls()
                .await
                .into_iter()
                .filter_map(|call| match call {
                    TransportCall::Put {
                        session_url,
                        start,
                        end,
                        ..
                    } => Some((session_url, start, end)),
                    TransportCall::Query { .. } => None,
                })
                .collect()
        }

        /// Bytes the simulated server holds for `session_url`.
        pub async fn persisted(&self, session_url: &str) -> u64 {
            self.state
                .lock()
                .await
                .persisted
                .get(session_url)
                .copied()
                .unwrap_or(0)
        }
    }

    fn resume_or_complete(persisted: u64, total: u64) -> TransferStatus {
        if persisted >= total {
            TransferStatus::Complete
        } else if persisted == 0 {
            TransferStatus::Resume { persisted: None }
        } else {
            TransferStatus::Resume {
                persisted: Some(persisted),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChunkTransport for ScriptedTransport {
        async fn put_chunk(
            &self,
            session_url: &str,
            chunk: Bytes,
            start: u64,
            total: u64,
        ) -> Result<TransferStatus, UploadError> {
            let end = start + chunk.len() as u64;
            let script = {
                let mut state = self.state.lock().await;
                state.calls.push(TransportCall::Put {
                    session_url: session_url.to_string(),
                    start,
                    end,
                    total,
                });
                state.puts.pop_front().unwrap_or(Scripted::Simulate)
            };

            let lost = matches!(script, Scripted::Lost);
            match script {
                Scripted::Respond(status) => return Ok(status),
                Scripted::Fail(err) => return Err(err),
                Scripted::Delayed(delay) => tokio::time::sleep(delay).await,
                Scripted::Simulate | Scripted::Lost => {}
            }

            let mut state = self.state.lock().await;
            let held = state.persisted.entry(session_url.to_string()).or_insert(0);
            // A correct server only appends contiguous bytes.
            if start <= *held {
                *held = (*held).max(end);
            }
            let status = resume_or_complete(*held, total);

            if lost {
                return Err(UploadError::Network("response lost".to_string()));
            }
            Ok(status)
        }

        async fn query_status(
            &self,
            session_url: &str,
            total: u64,
        ) -> Result<TransferStatus, UploadError> {
            let mut state = self.state.lock().await;
            state.calls.push(TransportCall::Query {
                session_url: session_url.to_string(),
                total,
            });

            match state.queries.pop_front().unwrap_or(Scripted::Simulate) {
                Scripted::Respond(status) => Ok(status),
                Scripted::Fail(err) => Err(err),
                Scripted::Simulate | Scripted::Delayed(_) | Scripted::Lost => {
                    let held = state.persisted.get(session_url).copied().unwrap_or(0);
                    Ok(resume_or_complete(held, total))
                }
            }
        }
    }
}
