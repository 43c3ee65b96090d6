//! Observability module for the upload broker.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
