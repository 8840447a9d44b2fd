//! Domain types for the taskbridge engine.
//!
//! Everything that crosses a module boundary carries `chrono::DateTime<Utc>`
//! timestamps; raw integer milliseconds live only inside the chat wire format.
//! All types are serializable/deserializable via serde.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed task identifier native to the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatTaskId(pub String);

impl fmt::Display for ChatTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ChatTaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChatTaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed record identifier native to the board workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardRecordId(pub String);

impl fmt::Display for BoardRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BoardRecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BoardRecordId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Surrogate key of a persisted sync link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lnk-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which of the two synchronized systems a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The messaging-platform to-do list (event-driven).
    Chat,
    /// The workspace database (poll-driven).
    Board,
}

impl Side {
    /// The opposite side.
    pub fn other(self) -> Side {
        match self {
            Side::Chat => Side::Board,
            Side::Board => Side::Chat,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Chat => write!(f, "chat"),
            Side::Board => write!(f, "board"),
        }
    }
}

/// Completion state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Open,
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Open => write!(f, "open"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

/// Which board collection a task belongs to.
///
/// Determined on the chat side by comparing executor/creator ids against the
/// configured self identity; on the board side by which collection the row
/// was listed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigneeRole {
    /// Assigned to the configured identity by someone else.
    AssignedToMe,
    /// Created by the configured identity for someone else.
    AssignedByMe,
}

impl AssigneeRole {
    pub fn all() -> [AssigneeRole; 2] {
        [AssigneeRole::AssignedToMe, AssigneeRole::AssignedByMe]
    }
}

impl fmt::Display for AssigneeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssigneeRole::AssignedToMe => write!(f, "assigned_to_me"),
            AssigneeRole::AssignedByMe => write!(f, "assigned_by_me"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Canonical, system-agnostic view of a task as reported by one source system.
///
/// Invariant: at least one of `chat_id` / `board_id` is set. A snapshot with
/// both unset is invalid and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub chat_id: Option<ChatTaskId>,
    pub board_id: Option<BoardRecordId>,
    pub title: String,
    pub status: TaskStatus,
    pub role: AssigneeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Last-modified timestamp as reported by the source system itself.
    pub updated_at: DateTime<Utc>,
    /// Which system this snapshot was observed from.
    pub source: Side,
    #[serde(default)]
    pub deleted: bool,
}

impl TaskSnapshot {
    /// The snapshot's identifier on its own source side, as a display string.
    pub fn source_id(&self) -> String {
        match self.source {
            Side::Chat => self
                .chat_id
                .as_ref()
                .map(|id| id.0.clone())
                .unwrap_or_default(),
            Side::Board => self
                .board_id
                .as_ref()
                .map(|id| id.0.clone())
                .unwrap_or_default(),
        }
    }

    /// True when the snapshot carries an identifier on at least one side.
    pub fn is_identified(&self) -> bool {
        self.chat_id.is_some() || self.board_id.is_some()
    }
}

/// Persisted identity mapping between one chat task and one board record,
/// plus the fingerprints and timestamps of the last state known synchronized.
///
/// Either id may still be unset while the pair awaits its first mirror write.
/// Links are never deleted; deletion on one side sets `tombstoned`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLink {
    pub id: LinkId,
    pub chat_id: Option<ChatTaskId>,
    pub board_id: Option<BoardRecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_hash_chat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_hash_board: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at_chat: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at_board: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tombstoned: bool,
}

impl SyncLink {
    pub fn new(id: LinkId, chat_id: Option<ChatTaskId>, board_id: Option<BoardRecordId>) -> Self {
        Self {
            id,
            chat_id,
            board_id,
            last_synced_hash_chat: None,
            last_synced_hash_board: None,
            last_synced_at_chat: None,
            last_synced_at_board: None,
            tombstoned: false,
        }
    }

    /// Last-synced fingerprint for `side`.
    pub fn hash_for(&self, side: Side) -> Option<&str> {
        match side {
            Side::Chat => self.last_synced_hash_chat.as_deref(),
            Side::Board => self.last_synced_hash_board.as_deref(),
        }
    }

    /// Last-synced timestamp for `side`.
    pub fn synced_at_for(&self, side: Side) -> Option<DateTime<Utc>> {
        match side {
            Side::Chat => self.last_synced_at_chat,
            Side::Board => self.last_synced_at_board,
        }
    }

    /// External id on `side`, as a display string if present.
    pub fn external_id_for(&self, side: Side) -> Option<String> {
        match side {
            Side::Chat => self.chat_id.as_ref().map(|id| id.0.clone()),
            Side::Board => self.board_id.as_ref().map(|id| id.0.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
