//! Conflict resolution — the pure decision core of a reconciliation pass.
//!
//! `resolve` sees one normalized snapshot (plus the other side's fetched
//! counterpart, when there is one) and the persisted link, and decides what
//! single write, if any, converges the pair. It performs no I/O.
//!
//! Rule order:
//! 1. deletion propagation (tombstone-guarded, so it is terminal)
//! 2. tombstoned link → stale late event, no-op
//! 3. no link → mirror to the side that lacks the task
//! 4. echo suppression — the incoming content matches what we last wrote
//! 5. only the source changed → push source → other
//! 6. both changed → later timestamp wins; exact ties go to the chat side

use taskbridge_core::types::{Side, SyncLink, TaskSnapshot};

use crate::fingerprint::content_fingerprint;

/// One snapshot plus whatever the engine could fetch of the other side.
#[derive(Debug, Clone)]
pub struct ObservedPair {
    /// The snapshot whose arrival triggered this pass.
    pub incoming: TaskSnapshot,
    /// The other side's current record, if it exists and was reachable.
    pub counterpart: Option<TaskSnapshot>,
}

impl ObservedPair {
    pub fn source(&self) -> Side {
        self.incoming.source
    }

    /// The snapshot observed from `side`, whichever role it plays here.
    pub fn snapshot_for(&self, side: Side) -> Option<&TaskSnapshot> {
        if self.incoming.source == side {
            Some(&self.incoming)
        } else {
            self.counterpart
                .as_ref()
                .filter(|snap| snap.source == side)
        }
    }
}

/// The write the engine should perform for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    NoOp,
    PushChatToBoard,
    PushBoardToChat,
    /// Produced by the dispatcher when a permanent target failure leaves the
    /// pair to be re-evaluated next pass; the resolver itself always reaches
    /// a concrete decision.
    Unresolved,
}

impl SyncAction {
    fn push_from(side: Side) -> SyncAction {
        match side {
            Side::Chat => SyncAction::PushChatToBoard,
            Side::Board => SyncAction::PushBoardToChat,
        }
    }

    /// The side a push writes to, if this is a push.
    pub fn target(self) -> Option<Side> {
        match self {
            SyncAction::PushChatToBoard => Some(Side::Board),
            SyncAction::PushBoardToChat => Some(Side::Chat),
            SyncAction::NoOp | SyncAction::Unresolved => None,
        }
    }

    /// The side whose content a push carries, if this is a push.
    pub fn winner(self) -> Option<Side> {
        self.target().map(Side::other)
    }
}

/// Ephemeral decision for one pass; logged, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDecision {
    pub action: SyncAction,
    pub reason: &'static str,
}

impl ConflictDecision {
    fn new(action: SyncAction, reason: &'static str) -> Self {
        Self { action, reason }
    }
}

/// Decide how to converge one pair. Pure function of its arguments.
pub fn resolve(observed: &ObservedPair, link: Option<&SyncLink>) -> ConflictDecision {
    let source = observed.source();

    if observed.incoming.deleted {
        return match link {
            None => ConflictDecision::new(SyncAction::NoOp, "deletion for unlinked task"),
            Some(l) if l.tombstoned => {
                ConflictDecision::new(SyncAction::NoOp, "pair already tombstoned")
            }
            Some(_) => {
                ConflictDecision::new(SyncAction::push_from(source), "propagate deletion")
            }
        };
    }

    let Some(link) = link else {
        return ConflictDecision::new(
            SyncAction::push_from(source),
            "first sight; mirror to the other side",
        );
    };

    if link.tombstoned {
        return ConflictDecision::new(SyncAction::NoOp, "stale event for tombstoned pair");
    }

    let incoming_fp = content_fingerprint(&observed.incoming);
    if link.hash_for(source) == Some(incoming_fp.as_str()) {
        return ConflictDecision::new(SyncAction::NoOp, "echo of our own prior write");
    }

    let other = source.other();
    let Some(counterpart) = observed.counterpart.as_ref() else {
        return ConflictDecision::new(
            SyncAction::push_from(source),
            "source changed; other side quiescent",
        );
    };
    let other_changed = match link.synced_at_for(other) {
        Some(synced_at) => counterpart.updated_at > synced_at,
        None => true,
    };
    if !other_changed {
        return ConflictDecision::new(
            SyncAction::push_from(source),
            "source changed; other side quiescent",
        );
    }

    // Both sides changed since their last-synced marks: latest edit wins,
    // exact ties go to the chat side.
    if observed.incoming.updated_at > counterpart.updated_at {
        ConflictDecision::new(SyncAction::push_from(source), "conflict: source edit is newer")
    } else if counterpart.updated_at > observed.incoming.updated_at {
        ConflictDecision::new(
            SyncAction::push_from(other),
            "conflict: other side's edit is newer",
        )
    } else {
        ConflictDecision::new(
            SyncAction::PushChatToBoard,
            "conflict tie: chat side wins deterministically",
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
