//! Change normalization — raw chat events and board rows into canonical
//! [`TaskSnapshot`]s.
//!
//! All source-specific parsing lives here; nothing downstream ever branches
//! on a raw payload shape. Malformed input fails with [`NormalizeError`] and
//! is dropped by the caller, never retried.

use chrono::{DateTime, TimeZone, Utc};

use taskbridge_core::types::{
    AssigneeRole, BoardRecordId, ChatTaskId, Side, TaskSnapshot, TaskStatus,
};

use crate::clients::{BoardRow, ChatEvent, ChatTaskRecord};
use crate::error::NormalizeError;

const EVENT_TASK_CREATED: &str = "task_created";
const EVENT_TASK_UPDATED: &str = "task_updated";
const EVENT_TASK_DELETED: &str = "task_deleted";

/// Normalize one decrypted webhook envelope from the chat platform.
///
/// Returns `Ok(None)` for well-formed events that do not involve the
/// configured identity (neither assigned to self nor created by self) —
/// those tasks are not ours to mirror.
pub fn normalize_chat_event(
    event: &ChatEvent,
    self_id: &str,
) -> Result<Option<TaskSnapshot>, NormalizeError> {
    let event_type = event
        .event_type
        .as_deref()
        .ok_or(NormalizeError::MissingField {
            field: "eventType",
        })?;
    let deleted = match event_type {
        EVENT_TASK_CREATED | EVENT_TASK_UPDATED => false,
        EVENT_TASK_DELETED => true,
        other => {
            return Err(NormalizeError::UnknownEventType {
                event_type: other.to_string(),
            })
        }
    };

    let record = &event.task_data;
    let task_id = required(record.task_id.as_deref(), "taskData.taskId")?;
    let updated_at = ms_to_datetime(required_ms(record.modified_time, "taskData.modifiedTime")?)?;

    let role = match classify_role(record, self_id) {
        Some(role) => role,
        // Deletion routing goes by id through the link store; the role on a
        // sparse delete payload is advisory only.
        None if deleted => AssigneeRole::AssignedToMe,
        None => return Ok(None),
    };

    let title = if deleted {
        record.subject.clone().unwrap_or_default()
    } else {
        required(record.subject.as_deref(), "taskData.subject")?.to_string()
    };

    let due_at = record.due_time.map(ms_to_datetime).transpose()?;

    Ok(Some(TaskSnapshot {
        chat_id: Some(ChatTaskId::from(task_id)),
        board_id: None,
        title,
        status: if record.done {
            TaskStatus::Done
        } else {
            TaskStatus::Open
        },
        role,
        due_at,
        updated_at,
        source: Side::Chat,
        deleted,
    }))
}

/// Normalize a chat task read back via `get_task` (counterpart enrichment).
///
/// The pairing fixes the role, so no self-identity classification happens
/// here.
pub fn normalize_chat_record(
    record: &ChatTaskRecord,
    role: AssigneeRole,
) -> Result<TaskSnapshot, NormalizeError> {
    let task_id = required(record.task_id.as_deref(), "taskId")?;
    let updated_at = ms_to_datetime(required_ms(record.modified_time, "modifiedTime")?)?;
    let due_at = record.due_time.map(ms_to_datetime).transpose()?;

    Ok(TaskSnapshot {
        chat_id: Some(ChatTaskId::from(task_id)),
        board_id: None,
        title: record.subject.clone().unwrap_or_default(),
        status: if record.done {
            TaskStatus::Done
        } else {
            TaskStatus::Open
        },
        role,
        due_at,
        updated_at,
        source: Side::Chat,
        deleted: false,
    })
}

/// Normalize one polled board row.
///
/// `fallback_role` is the collection the row was listed from — the two
/// collections ARE the role partition. Rows fetched via the chat-id mirror
/// column carry their own `role` and override the fallback.
pub fn normalize_board_row(
    row: &BoardRow,
    fallback_role: AssigneeRole,
) -> Result<TaskSnapshot, NormalizeError> {
    let record_id = required(row.record_id.as_deref(), "record_id")?;
    let title = required(row.title.as_deref(), "title")?.to_string();
    let updated_at = row.last_edited.ok_or(NormalizeError::MissingField {
        field: "last_edited",
    })?;

    let status_name = required(row.status.as_deref(), "status")?;
    let (status, deleted) = parse_board_status(status_name)?;

    Ok(TaskSnapshot {
        chat_id: row.chat_task_id.as_deref().map(ChatTaskId::from),
        board_id: Some(BoardRecordId::from(record_id)),
        title,
        status,
        role: row.role.unwrap_or(fallback_role),
        due_at: row.due_at,
        updated_at,
        source: Side::Board,
        deleted,
    })
}

/// Assigned-to-me vs assigned-by-me, relative to the configured identity.
///
/// `None` means the task does not involve self in exactly one of the two
/// ways the partition recognizes.
fn classify_role(record: &ChatTaskRecord, self_id: &str) -> Option<AssigneeRole> {
    let is_executor = record.executor_ids.iter().any(|id| id == self_id);
    let is_creator = record.creator_id.as_deref() == Some(self_id);
    match (is_executor, is_creator) {
        (true, false) => Some(AssigneeRole::AssignedToMe),
        (false, true) => Some(AssigneeRole::AssignedByMe),
        _ => None,
    }
}

fn parse_board_status(name: &str) -> Result<(TaskStatus, bool), NormalizeError> {
    match name.to_ascii_lowercase().as_str() {
        "open" | "to do" | "todo" | "in progress" => Ok((TaskStatus::Open, false)),
        "done" | "complete" | "completed" => Ok((TaskStatus::Done, false)),
        "deleted" => Ok((TaskStatus::Open, true)),
        _ => Err(NormalizeError::UnknownStatus {
            value: name.to_string(),
        }),
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, NormalizeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(NormalizeError::MissingField { field }),
    }
}

fn required_ms(value: Option<i64>, field: &'static str) -> Result<i64, NormalizeError> {
    value.ok_or(NormalizeError::MissingField { field })
}

fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>, NormalizeError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(NormalizeError::InvalidTimestamp { value: ms })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
