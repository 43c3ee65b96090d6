//! Common utilities and types shared across Skiff components.

#![warn(clippy::pedantic)]

/// Module for service credential loading and configuration helpers
pub mod config;

/// Module for wire types shared by the broker and the upload client
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for compact JWT assertion signing (RS256)
pub mod jwt;

/// Module for bearer token exchange with single-flight caching
pub mod token_manager;

/// Deterministic fixtures for tests (RSA key material)
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
