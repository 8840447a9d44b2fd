//! Content fingerprints for echo suppression.
//!
//! A fingerprint covers exactly the fields the engine propagates (title,
//! status, role, due date); identifiers, source tags, and timestamps are
//! excluded so the same content yields the same digest regardless of which
//! system reported it. Due dates are truncated to whole seconds because the
//! two systems disagree on sub-second precision.

use sha2::{Digest, Sha256};

use taskbridge_core::types::TaskSnapshot;

/// SHA-256 hex digest of a snapshot's synchronized content.
pub fn content_fingerprint(task: &TaskSnapshot) -> String {
    let due = task
        .due_at
        .map(|d| d.timestamp().to_string())
        .unwrap_or_else(|| "-".to_string());
    let canonical = format!("{}\n{}\n{}\n{}", task.title.trim(), task.status, task.role, due);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
