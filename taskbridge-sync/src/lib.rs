//! # taskbridge-sync
//!
//! The reconciliation engine: change normalization, conflict resolution,
//! fingerprint-gated write dispatch, and the shared pipeline both the
//! event-driven and the interval-driven drivers funnel into.
//!
//! Construct a [`SyncEngine`] with the two client implementations and call
//! [`SyncEngine::handle_chat_event`] / [`SyncEngine::poll_board`].

pub mod clients;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod normalize;
pub mod notify;
pub mod resolve;

pub use clients::{BoardClient, BoardRow, ChatClient, ChatEvent, ChatTaskRecord, ClientError,
    WriteReceipt};
pub use dispatch::{ApplyOutcome, RetryPolicy};
pub use engine::{PassSummary, SyncEngine};
pub use error::{NormalizeError, SyncError};
pub use fingerprint::content_fingerprint;
pub use notify::{LogSink, NotificationSink, NotifyKind};
pub use resolve::{resolve, ConflictDecision, ObservedPair, SyncAction};
