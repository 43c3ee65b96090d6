//! HTTP request handlers for the upload broker.

pub mod health;
pub mod metrics;
pub mod sessions;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use sessions::{create_session, session_preflight};
