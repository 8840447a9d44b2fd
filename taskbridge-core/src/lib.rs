//! Taskbridge core library — domain types, link store persistence,
//! configuration, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs
//! - [`error`] — [`StoreError`], [`ConfigError`]
//! - [`link_store`] — the durable chat↔board identity mapping
//! - [`config`] — YAML configuration load + validation

pub mod config;
pub mod error;
pub mod link_store;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, StoreError};
pub use link_store::{EnsureOutcome, LinkStore};
pub use types::{
    AssigneeRole, BoardRecordId, ChatTaskId, LinkId, Side, SyncLink, TaskSnapshot, TaskStatus,
};
