//! Resumable Upload Client Library
//!
//! Uploads files in ordered chunks to a resumable session obtained from the
//! upload broker, recovering from transient failures and dead sessions.
//!
//! # Architecture
//!
//! ```text
//! queue.rs -> uploader.rs -> broker_client.rs (session initiation)
//!                         -> transport.rs     (chunk PUTs, status queries)
//!                         -> notifier.rs      (completion notification)
//!                         -> source.rs        (byte ranges)
//! ```
//!
//! # Modules
//!
//! - `config` - Client configuration from environment
//! - `errors` - Upload error taxonomy
//! - `events` - Per-task snapshots published to subscribers
//! - `queue` - Concurrent upload tasks with cancellation

pub mod broker_client;
pub mod config;
pub mod errors;
pub mod events;
pub mod notifier;
pub mod queue;
pub mod source;
pub mod transport;
pub mod uploader;
