//! Completion notification.
//!
//! Runs after an upload succeeds. Its outcome is logged and never changes the
//! task's status.

use common::types::{NotificationOutcome, NotificationRequest};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Tells an external collaborator that a file finished uploading.
#[async_trait::async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, file_name: &str) -> NotificationOutcome;
}

/// Notifier that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait::async_trait]
impl CompletionNotifier for NoopNotifier {
    async fn notify(&self, _file_name: &str) -> NotificationOutcome {
        NotificationOutcome::delivered()
    }
}

/// Notifier POSTing `{"fileName": ...}` to a URL.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http_client: Client,
    url: String,
}

impl HttpNotifier {
    /// Create a notifier posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client fails to build.
    pub fn new(url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client, url })
    }
}

#[async_trait::async_trait]
impl CompletionNotifier for HttpNotifier {
    #[instrument(skip_all)]
    async fn notify(&self, file_name: &str) -> NotificationOutcome {
        let request = NotificationRequest {
            file_name: file_name.to_string(),
        };

        let response = match self.http_client.post(&self.url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(target: "client.notifier", error = %e, "Notification request failed");
                return NotificationOutcome::failed(e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(target: "client.notifier", status = %status, "Notification rejected");
            return NotificationOutcome::failed(format!(
                "Notification endpoint returned status {}",
                status.as_u16()
            ));
        }

        // Collaborators may answer with an outcome body or nothing at all.
        match response.json::<NotificationOutcome>().await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(target: "client.notifier", "Notification accepted without outcome body");
                NotificationOutcome::delivered()
            }
        }
    }
}

/// Mock notifier module for testing.
pub mod mock {

    use super::*;
    use tokio::sync::{Mutex, Notify};

    /// Mock notifier recording every file name it is told about.
    #[derive(Debug)]
    pub struct MockNotifier {
        outcome: NotificationOutcome,
        notified: Mutex<Vec<String>>,
        signal: Notify,
    }

    impl MockNotifier {
        /// Create a mock that reports delivery.
        pub fn delivering() -> Self {
            Self::with_outcome(NotificationOutcome::delivered())
        }

        /// Create a mock that reports failure with `message`.
        pub fn failing(message: &str) -> Self {
            Self::with_outcome(NotificationOutcome::failed(message))
        }

        fn with_outcome(outcome: NotificationOutcome) -> Self {
            Self {
                outcome,
                notified: Mutex::new(Vec::new()),
                signal: Notify::new(),
            }
        }

        /// File names notified so far.
        pub async fn notified(&self) -> Vec<String> {
            self.notified.lock().await.clone()
        }

        /// Wait until at least `count` notifications arrived.
        pub async fn wait_for(&self, count: usize) -> Vec<String> {
            loop {
                let notified = self.signal.notified();
                {
                    let names = self.notified.lock().await;
                    if names.len() >= count {
                        return names.clone();
                    }
                }
                notified.await;
            }
        }
    }

    #[async_trait::async_trait]
    impl CompletionNotifier for MockNotifier {
        async fn notify(&self, file_name: &str) -> NotificationOutcome {
            self.notified.lock().await.push(file_name.to_string());
            self.signal.notify_waiters();
            self.outcome.clone()
        }
    }
}
