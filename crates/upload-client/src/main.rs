//! skiff-upload
//!
//! Uploads the files named on the command line through the upload broker.
//! Configuration comes from the environment (see `ClientConfig`).

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_client::broker_client::HttpBrokerClient;
use upload_client::config::ClientConfig;
use upload_client::events::UploadStatus;
use upload_client::notifier::{CompletionNotifier, HttpNotifier, NoopNotifier};
use upload_client::queue::{UploadHandle, UploadQueue};
use upload_client::source::{FileSource, SequentialByteSource};
use upload_client::transport::HttpChunkTransport;
use upload_client::uploader::{ResumableUploader, UploadOptions};

#[derive(Parser)]
#[command(name = "skiff-upload", about = "Resumable uploads through the Skiff broker")]
struct Cli {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// MIME type for every file (guessed from the extension otherwise)
    #[arg(long)]
    mime_type: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        broker_url = %config.broker_url,
        origin = %config.origin,
        chunk_size = config.chunk_size,
        max_retries = config.max_retries,
        "Configuration loaded successfully"
    );

    let initiator = HttpBrokerClient::new(
        config.broker_url.clone(),
        config.origin.clone(),
        config.request_timeout,
    )?;
    let transport = HttpChunkTransport::new(config.request_timeout)?;
    let notifier: Arc<dyn CompletionNotifier> = match &config.notify_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone(), config.request_timeout)?),
        None => Arc::new(NoopNotifier),
    };

    let uploader = ResumableUploader::new(
        Arc::new(initiator),
        Arc::new(transport),
        notifier,
        UploadOptions::from(&config),
    );
    let queue = UploadQueue::new(uploader);

    let mut handles = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let source = FileSource::open(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = cli.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

        let source: Arc<dyn SequentialByteSource> = Arc::new(source);
        let handle = queue.enqueue(file_name, mime_type, source).await;
        handles.push(handle);
    }

    let watchers: Vec<_> = handles.iter().cloned().map(watch_progress).collect();

    let failed = tokio::select! {
        failed = wait_all(&handles) => failed,
        () = shutdown_signal() => {
            warn!("Cancelling uploads");
            for handle in &handles {
                handle.cancel();
            }
            wait_all(&handles).await;
            handles.len()
        }
    };

    for watcher in watchers {
        watcher.abort();
    }

    if failed > 0 {
        return Err(format!("{failed} of {} uploads did not complete", handles.len()).into());
    }

    info!("All uploads complete");
    Ok(())
}

/// Log every progress change of one upload.
fn watch_progress(handle: UploadHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut receiver = handle.subscribe();
        let mut last_progress = None;
        while receiver.changed().await.is_ok() {
            let snapshot = receiver.borrow_and_update().clone();
            if last_progress != Some(snapshot.progress) {
                last_progress = Some(snapshot.progress);
                info!(
                    file = %snapshot.file_name,
                    status = ?snapshot.status,
                    progress = snapshot.progress,
                    retry_count = snapshot.retry_count,
                    "Upload progress"
                );
            }
        }
    })
}

/// Wait for every upload; returns how many did not succeed.
async fn wait_all(handles: &[UploadHandle]) -> usize {
    let mut failed = 0;
    for handle in handles {
        let done = handle.wait().await;
        if done.status == UploadStatus::Success {
            info!(file = %done.file_name, bytes = done.total_bytes, "Uploaded");
        } else {
            failed += 1;
            error!(
                file = %done.file_name,
                status = ?done.status,
                error = done.error.as_deref().unwrap_or("unknown"),
                "Upload did not complete"
            );
        }
    }
    failed
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT"),
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
