//! Service layer for the upload broker.
//!
//! # Components
//!
//! - `broker` - the session broker (origin check, token, storage session)
//! - `origin` - caller origin allow-list
//! - `storage_client` - HTTP client for the storage API's resumable endpoint

pub mod broker;
pub mod origin;
pub mod storage_client;

pub use broker::UploadSessionBroker;
pub use origin::{OriginPolicy, PatternOriginPolicy};
pub use storage_client::{HttpStorageClient, SessionRequest, StorageClient};
