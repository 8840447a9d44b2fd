//! Write dispatch — applies a [`ConflictDecision`] to the target system.
//!
//! The link store is untouched until the target confirms the write, so a
//! crash mid-retry leaves durable state consistent; the next pass simply
//! re-decides. A confirmed write records bookkeeping for BOTH sides of the
//! pair: the target side from the write receipt, and the winning side from
//! the content that was pushed. That second record is what arms echo
//! suppression for the next inbound event.

use std::time::Duration;

use taskbridge_core::config::SyncConfig;
use taskbridge_core::link_store::LinkStore;
use taskbridge_core::types::{BoardRecordId, ChatTaskId, LinkId, Side, TaskSnapshot};

use crate::clients::{BoardClient, ChatClient, ClientError, WriteReceipt};
use crate::error::SyncError;
use crate::fingerprint::content_fingerprint;
use crate::resolve::{ConflictDecision, ObservedPair, SyncAction};

/// Bounded exponential backoff for transient target failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self::new(
            config.max_write_attempts,
            Duration::from_millis(config.retry_base_ms),
        )
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// What actually happened when a decision was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    NoOp,
    Written { target: Side, created: bool },
    Deleted { target: Side },
    Unresolved { reason: String },
}

/// Apply `decision` for one pair.
///
/// Fails with [`SyncError::TransientWrite`] when every retry attempt was
/// exhausted and with [`SyncError::TargetRejected`] on permanent failures;
/// in both cases the store is left exactly as it was.
pub fn apply(
    decision: &ConflictDecision,
    observed: &ObservedPair,
    link_id: LinkId,
    store: &mut LinkStore,
    chat: &dyn ChatClient,
    board: &dyn BoardClient,
    retry: &RetryPolicy,
) -> Result<ApplyOutcome, SyncError> {
    let (Some(target), Some(winner)) = (decision.action.target(), decision.action.winner())
    else {
        return Ok(match decision.action {
            SyncAction::Unresolved => ApplyOutcome::Unresolved {
                reason: decision.reason.to_string(),
            },
            _ => ApplyOutcome::NoOp,
        });
    };

    let Some(content) = observed.snapshot_for(winner).cloned() else {
        return Ok(ApplyOutcome::Unresolved {
            reason: "winning side's content is unavailable".to_string(),
        });
    };

    if content.deleted {
        return propagate_deletion(link_id, target, store, chat, board, retry);
    }

    let target_id = store
        .get(link_id)
        .and_then(|link| link.external_id_for(target));
    let created = target_id.is_none();

    let receipt = match (target, target_id) {
        (Side::Board, None) => with_retry(retry, target, || {
            board.create_record(content.role, &content)
        })?,
        (Side::Board, Some(id)) => with_retry(retry, target, || {
            board.update_record(&BoardRecordId::from(id.as_str()), &content)
        })?,
        (Side::Chat, None) => with_retry(retry, target, || chat.create_task(&content))?,
        (Side::Chat, Some(id)) => with_retry(retry, target, || {
            chat.update_task(&ChatTaskId::from(id.as_str()), &content)
        })?,
    };

    record_pair_synced(store, link_id, target, &receipt, winner, &content);

    tracing::info!(
        "wrote {target}: '{}' ({})",
        content.title,
        receipt.external_id
    );
    Ok(ApplyOutcome::Written { target, created })
}

/// Delete the target record (tolerating an already-gone target) and
/// tombstone the link.
fn propagate_deletion(
    link_id: LinkId,
    target: Side,
    store: &mut LinkStore,
    chat: &dyn ChatClient,
    board: &dyn BoardClient,
    retry: &RetryPolicy,
) -> Result<ApplyOutcome, SyncError> {
    let target_id = store
        .get(link_id)
        .and_then(|link| link.external_id_for(target));

    if let Some(id) = target_id {
        let deleted = match target {
            Side::Board => with_retry(retry, target, || {
                board.delete_record(&BoardRecordId::from(id.as_str()))
            }),
            Side::Chat => with_retry(retry, target, || {
                chat.delete_task(&ChatTaskId::from(id.as_str()))
            }),
        };
        match deleted {
            Ok(()) => {}
            // The record vanished on its own; that is the state we wanted.
            Err(SyncError::TargetRejected { message, .. }) => {
                tracing::debug!("delete on {target} already satisfied: {message}");
            }
            Err(err) => return Err(err),
        }
    }

    store.mark_tombstoned(link_id);
    tracing::info!("tombstoned pair {link_id}");
    Ok(ApplyOutcome::Deleted { target })
}

/// Bookkeeping after a confirmed write: target side from the receipt, winning
/// side from the pushed content. Both end up with the same fingerprint.
fn record_pair_synced(
    store: &mut LinkStore,
    link_id: LinkId,
    target: Side,
    receipt: &WriteReceipt,
    winner: Side,
    content: &TaskSnapshot,
) {
    let fp = content_fingerprint(content);
    store.record_confirmed_write(
        link_id,
        target,
        Some(&receipt.external_id),
        &fp,
        receipt.updated_at,
    );

    let winner_id = match winner {
        Side::Chat => content.chat_id.as_ref().map(|id| id.0.clone()),
        Side::Board => content.board_id.as_ref().map(|id| id.0.clone()),
    };
    store.record_confirmed_write(
        link_id,
        winner,
        winner_id.as_deref(),
        &fp,
        content.updated_at,
    );
}

fn with_retry<T>(
    retry: &RetryPolicy,
    side: Side,
    mut op: impl FnMut() -> Result<T, ClientError>,
) -> Result<T, SyncError> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(ClientError::Rejected(message)) => {
                return Err(SyncError::TargetRejected { side, message })
            }
            Err(ClientError::Transient(message)) => {
                attempt += 1;
                if attempt >= retry.max_attempts {
                    return Err(SyncError::TransientWrite {
                        side,
                        attempts: attempt,
                        message,
                    });
                }
                tracing::warn!(
                    "transient {side} failure (attempt {attempt}/{}): {message}",
                    retry.max_attempts
                );
                std::thread::sleep(retry.delay_for(attempt));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{DateTime, TimeZone, Utc};
    use taskbridge_core::types::{AssigneeRole, TaskStatus};

    use crate::clients::{BoardRow, ChatTaskRecord};
    use crate::resolve::resolve;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn chat_snapshot(title: &str) -> TaskSnapshot {
        TaskSnapshot {
            chat_id: Some(ChatTaskId::from("A1")),
            board_id: None,
            title: title.to_string(),
            status: TaskStatus::Open,
            role: AssigneeRole::AssignedToMe,
            due_at: None,
            updated_at: t0(),
            source: Side::Chat,
            deleted: false,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    /// Board fake: counts calls, optionally failing the first N with a
    /// chosen error class.
    #[derive(Default)]
    struct FlakyBoard {
        fail_first: Mutex<u32>,
        reject_all: bool,
        creates: Mutex<u32>,
        updates: Mutex<u32>,
        deletes: Mutex<u32>,
    }

    impl FlakyBoard {
        fn next_result(&self) -> Result<(), ClientError> {
            if self.reject_all {
                return Err(ClientError::Rejected("record gone".into()));
            }
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::Transient("rate limited".into()));
            }
            Ok(())
        }
    }

    impl BoardClient for FlakyBoard {
        fn create_record(
            &self,
            _role: AssigneeRole,
            _content: &TaskSnapshot,
        ) -> Result<WriteReceipt, ClientError> {
            self.next_result()?;
            *self.creates.lock().unwrap() += 1;
            Ok(WriteReceipt {
                external_id: "B1".into(),
                updated_at: t0(),
            })
        }

        fn update_record(
            &self,
            id: &BoardRecordId,
            _content: &TaskSnapshot,
        ) -> Result<WriteReceipt, ClientError> {
            self.next_result()?;
            *self.updates.lock().unwrap() += 1;
            Ok(WriteReceipt {
                external_id: id.0.clone(),
                updated_at: t0(),
            })
        }

        fn delete_record(&self, _id: &BoardRecordId) -> Result<(), ClientError> {
            self.next_result()?;
            *self.deletes.lock().unwrap() += 1;
            Ok(())
        }

        fn list_records(&self, _role: AssigneeRole) -> Result<Vec<BoardRow>, ClientError> {
            Ok(vec![])
        }

        fn find_by_chat_id(
            &self,
            _chat_id: &ChatTaskId,
        ) -> Result<Option<BoardRow>, ClientError> {
            Ok(None)
        }
    }

    struct NoChat;

    impl ChatClient for NoChat {
        fn create_task(&self, _content: &TaskSnapshot) -> Result<WriteReceipt, ClientError> {
            Err(ClientError::Rejected("unused in this test".into()))
        }
        fn update_task(
            &self,
            _id: &ChatTaskId,
            _content: &TaskSnapshot,
        ) -> Result<WriteReceipt, ClientError> {
            Err(ClientError::Rejected("unused in this test".into()))
        }
        fn delete_task(&self, _id: &ChatTaskId) -> Result<(), ClientError> {
            Err(ClientError::Rejected("unused in this test".into()))
        }
        fn get_task(&self, _id: &ChatTaskId) -> Result<Option<ChatTaskRecord>, ClientError> {
            Ok(None)
        }
    }

    fn push_decision(pair: &ObservedPair) -> ConflictDecision {
        resolve(pair, None)
    }

    #[test]
    fn create_records_both_sides_after_confirmation() {
        let mut store = LinkStore::empty();
        let pair = ObservedPair {
            incoming: chat_snapshot("Review doc"),
            counterpart: None,
        };
        let decision = push_decision(&pair);
        let link_id = store
            .ensure_link(pair.incoming.chat_id.as_ref(), None)
            .id();

        let board = FlakyBoard::default();
        let outcome = apply(
            &decision,
            &pair,
            link_id,
            &mut store,
            &NoChat,
            &board,
            &fast_retry(3),
        )
        .expect("apply");

        assert_eq!(
            outcome,
            ApplyOutcome::Written {
                target: Side::Board,
                created: true
            }
        );
        let link = store.get(link_id).unwrap();
        assert_eq!(link.board_id, Some(BoardRecordId::from("B1")));
        let fp = content_fingerprint(&pair.incoming);
        assert_eq!(link.hash_for(Side::Board), Some(fp.as_str()));
        assert_eq!(link.hash_for(Side::Chat), Some(fp.as_str()));
        assert_eq!(link.synced_at_for(Side::Chat), Some(t0()));
    }

    #[test]
    fn transient_failures_are_retried_to_success() {
        let mut store = LinkStore::empty();
        let pair = ObservedPair {
            incoming: chat_snapshot("Review doc"),
            counterpart: None,
        };
        let decision = push_decision(&pair);
        let link_id = store
            .ensure_link(pair.incoming.chat_id.as_ref(), None)
            .id();

        let board = FlakyBoard {
            fail_first: Mutex::new(2),
            ..FlakyBoard::default()
        };
        let outcome = apply(
            &decision,
            &pair,
            link_id,
            &mut store,
            &NoChat,
            &board,
            &fast_retry(4),
        )
        .expect("apply should succeed on third attempt");
        assert!(matches!(outcome, ApplyOutcome::Written { .. }));
        assert_eq!(*board.creates.lock().unwrap(), 1);
    }

    #[test]
    fn exhausted_retries_escalate_and_leave_store_untouched() {
        let mut store = LinkStore::empty();
        let pair = ObservedPair {
            incoming: chat_snapshot("Review doc"),
            counterpart: None,
        };
        let decision = push_decision(&pair);
        let link_id = store
            .ensure_link(pair.incoming.chat_id.as_ref(), None)
            .id();

        let board = FlakyBoard {
            fail_first: Mutex::new(10),
            ..FlakyBoard::default()
        };
        let err = apply(
            &decision,
            &pair,
            link_id,
            &mut store,
            &NoChat,
            &board,
            &fast_retry(3),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SyncError::TransientWrite {
                side: Side::Board,
                attempts: 3,
                ..
            }
        ));

        let link = store.get(link_id).unwrap();
        assert_eq!(link.board_id, None, "no id recorded without confirmation");
        assert_eq!(link.hash_for(Side::Board), None);
        assert_eq!(link.hash_for(Side::Chat), None);
    }

    #[test]
    fn rejected_write_is_permanent_and_leaves_store_untouched() {
        let mut store = LinkStore::empty();
        let pair = ObservedPair {
            incoming: chat_snapshot("Review doc"),
            counterpart: None,
        };
        let decision = push_decision(&pair);
        let link_id = store
            .ensure_link(pair.incoming.chat_id.as_ref(), None)
            .id();

        let board = FlakyBoard {
            reject_all: true,
            ..FlakyBoard::default()
        };
        let err = apply(
            &decision,
            &pair,
            link_id,
            &mut store,
            &NoChat,
            &board,
            &fast_retry(3),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::TargetRejected { .. }));
        assert_eq!(store.get(link_id).unwrap().hash_for(Side::Board), None);
    }

    #[test]
    fn deletion_tombstones_even_when_target_already_gone() {
        let mut store = LinkStore::empty();
        let mut deleted = chat_snapshot("Review doc");
        deleted.deleted = true;
        let link_id = store
            .ensure_link(deleted.chat_id.as_ref(), Some(&BoardRecordId::from("B1")))
            .id();
        let pair = ObservedPair {
            incoming: deleted,
            counterpart: None,
        };
        let decision = ConflictDecision {
            action: SyncAction::PushChatToBoard,
            reason: "propagate deletion",
        };

        let board = FlakyBoard {
            reject_all: true,
            ..FlakyBoard::default()
        };
        let outcome = apply(
            &decision,
            &pair,
            link_id,
            &mut store,
            &NoChat,
            &board,
            &fast_retry(2),
        )
        .expect("rejected delete still tombstones");
        assert_eq!(
            outcome,
            ApplyOutcome::Deleted {
                target: Side::Board
            }
        );
        assert!(store.get(link_id).unwrap().tombstoned);
    }

    #[test]
    fn noop_touches_nothing() {
        let mut store = LinkStore::empty();
        let pair = ObservedPair {
            incoming: chat_snapshot("Review doc"),
            counterpart: None,
        };
        let link_id = store
            .ensure_link(pair.incoming.chat_id.as_ref(), None)
            .id();
        let decision = ConflictDecision {
            action: SyncAction::NoOp,
            reason: "echo of our own prior write",
        };
        let board = FlakyBoard::default();
        let outcome = apply(
            &decision,
            &pair,
            link_id,
            &mut store,
            &NoChat,
            &board,
            &fast_retry(2),
        )
        .unwrap();
        assert_eq!(outcome, ApplyOutcome::NoOp);
        assert_eq!(*board.creates.lock().unwrap(), 0);
        assert_eq!(*board.updates.lock().unwrap(), 0);
    }

    #[test]
    fn backoff_delays_double_per_attempt() {
        let retry = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(400));
    }
}
