//! Notification side-channel.
//!
//! Downstream consumers (a bot message, a digest, nothing at all) hang off
//! this sink. Delivery is fire-and-forget: the signature is infallible and
//! implementations must swallow their own failures — a broken notifier can
//! never block or roll back a sync decision. Overdue tasks are re-announced
//! on every poll tick; deduplication belongs to the notifier.

use std::fmt;

use taskbridge_core::types::TaskSnapshot;

/// Coarse-grained event kinds emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    /// A task newly mirrored into the assigned-to-me collection.
    AssignedToYou,
    /// A task the operator assigned to someone else was completed.
    YourTaskCompleted,
    /// An open task is past its due date.
    TaskOverdue,
}

impl fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyKind::AssignedToYou => write!(f, "assigned_to_you"),
            NotifyKind::YourTaskCompleted => write!(f, "your_task_completed"),
            NotifyKind::TaskOverdue => write!(f, "task_overdue"),
        }
    }
}

/// Best-effort sink for sync events.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: NotifyKind, task: &TaskSnapshot);
}

/// Default sink: one log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, kind: NotifyKind, task: &TaskSnapshot) {
        tracing::info!("notify {kind}: '{}' ({})", task.title, task.source_id());
    }
}
