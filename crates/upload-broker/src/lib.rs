//! Upload Broker Service Library
//!
//! Issues resumable upload sessions to browser clients without exposing the
//! service credential or the bearer token it is exchanged for.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/broker.rs -> services/storage_client.rs
//!                                                      -> common::token_manager
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup
//! - `services` - Session broker, origin policy, storage client

pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod routes;
pub mod services;
