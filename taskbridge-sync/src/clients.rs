//! Client seams for the two task-bearing systems.
//!
//! The engine only ever talks to these traits; the live HTTP adapters (and
//! the in-memory fakes used in tests) live behind them. Implementations are
//! blocking — the daemon wraps whole reconciliation passes in
//! `spawn_blocking`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use taskbridge_core::types::{AssigneeRole, BoardRecordId, ChatTaskId, TaskSnapshot};

/// Failure classification every client must perform.
///
/// Transient failures (rate limits, network) are retried with backoff;
/// rejected writes (target gone, validation) are surfaced and re-evaluated on
/// a later pass.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// Confirmation of a create/update, carrying the target's authoritative
/// last-modified timestamp for that write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub external_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Raw task payload as the chat platform reports it — webhook events and
/// `get_task` reads share this shape. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatTaskRecord {
    pub task_id: Option<String>,
    pub subject: Option<String>,
    pub done: bool,
    pub due_time: Option<i64>,
    pub modified_time: Option<i64>,
    pub executor_ids: Vec<String>,
    pub creator_id: Option<String>,
}

/// One decrypted, signature-verified webhook envelope from the chat platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatEvent {
    pub event_type: Option<String>,
    pub task_data: ChatTaskRecord,
}

/// Raw row as listed from a board collection. The `chat_task_id` mirror
/// column is how the original pairing survives on the board side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BoardRow {
    pub record_id: Option<String>,
    pub chat_task_id: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub last_edited: Option<DateTime<Utc>>,
    /// Which collection the row came from, when the client knows.
    pub role: Option<AssigneeRole>,
}

/// The chat platform's task API, keyed by its native task id.
pub trait ChatClient: Send + Sync {
    fn create_task(&self, content: &TaskSnapshot) -> Result<WriteReceipt, ClientError>;
    fn update_task(
        &self,
        id: &ChatTaskId,
        content: &TaskSnapshot,
    ) -> Result<WriteReceipt, ClientError>;
    fn delete_task(&self, id: &ChatTaskId) -> Result<(), ClientError>;
    /// `Ok(None)` when the task does not (or no longer does) exist.
    fn get_task(&self, id: &ChatTaskId) -> Result<Option<ChatTaskRecord>, ClientError>;
}

/// The board workspace's record API against the two fixed collections.
pub trait BoardClient: Send + Sync {
    fn create_record(
        &self,
        role: AssigneeRole,
        content: &TaskSnapshot,
    ) -> Result<WriteReceipt, ClientError>;
    fn update_record(
        &self,
        id: &BoardRecordId,
        content: &TaskSnapshot,
    ) -> Result<WriteReceipt, ClientError>;
    fn delete_record(&self, id: &BoardRecordId) -> Result<(), ClientError>;
    fn list_records(&self, role: AssigneeRole) -> Result<Vec<BoardRow>, ClientError>;
    /// Look a row up by its chat-id mirror column, across both collections.
    fn find_by_chat_id(&self, chat_id: &ChatTaskId) -> Result<Option<BoardRow>, ClientError>;
}
