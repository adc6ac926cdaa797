//! devflow core library: domain types, configuration, errors.
//!
//! - [`types`]: commit ids, change sets, snapshot metadata, checkouts
//! - [`config`]: [`SyncConfig`] and its load / save helpers
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::SyncConfig;
pub use error::ConfigError;
pub use types::{
    changed_paths, Change, CommitId, PublishPolicy, RepositoryCheckout, SnapshotMeta,
};
