//! Shared reconciliation pipeline.
//!
//! Both drivers call into here: the daemon's event path hands each validated
//! webhook envelope to [`SyncEngine::handle_chat_event`], and its interval
//! path runs [`SyncEngine::poll_board`] once per tick. Either way the same
//! steps run: normalize → link lookup → counterpart fetch → resolve →
//! dispatch → persist.
//!
//! Per-pair failures never abort the rest of a pass; they are counted in the
//! [`PassSummary`] and logged with enough context to diagnose without
//! reproducing the race.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use taskbridge_core::config::Config;
use taskbridge_core::error::StoreError;
use taskbridge_core::link_store::LinkStore;
use taskbridge_core::types::{AssigneeRole, Side, SyncLink, TaskSnapshot, TaskStatus};

use crate::clients::{BoardClient, ChatClient, ChatEvent};
use crate::dispatch::{self, ApplyOutcome, RetryPolicy};
use crate::error::SyncError;
use crate::fingerprint::content_fingerprint;
use crate::normalize::{normalize_board_row, normalize_chat_event, normalize_chat_record};
use crate::notify::{NotificationSink, NotifyKind};
use crate::resolve::{resolve, ObservedPair, SyncAction};

/// Counters for one reconciliation pass (one event, or one full poll tick).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub written: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
    pub unresolved: usize,
    pub malformed: usize,
    pub foreign: usize,
    pub errors: usize,
    /// True when a poll tick hit its deadline and left rows to the next tick.
    pub aborted: bool,
}

/// The reconciliation engine. Cheap to clone-by-Arc into the daemon's
/// blocking workers; all durable state lives in the link store on disk.
pub struct SyncEngine {
    root: PathBuf,
    self_user_id: String,
    retry: RetryPolicy,
    chat: Arc<dyn ChatClient>,
    board: Arc<dyn BoardClient>,
    sink: Arc<dyn NotificationSink>,
}

impl SyncEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        config: &Config,
        chat: Arc<dyn ChatClient>,
        board: Arc<dyn BoardClient>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            root: root.into(),
            self_user_id: config.chat.self_user_id.clone(),
            retry: RetryPolicy::from_sync_config(&config.sync),
            chat,
            board,
            sink,
        }
    }

    /// Reconcile one inbound chat event.
    ///
    /// Malformed envelopes are dropped (counted, logged), never retried.
    pub fn handle_chat_event(&self, event: &ChatEvent) -> Result<PassSummary, SyncError> {
        let mut summary = PassSummary::default();

        let snapshot = match normalize_chat_event(event, &self.self_user_id) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::debug!("chat event does not involve configured identity; skipping");
                summary.foreign += 1;
                return Ok(summary);
            }
            Err(err) => {
                tracing::warn!("dropping malformed chat event: {err}");
                summary.malformed += 1;
                return Ok(summary);
            }
        };

        let mut store = LinkStore::load_at(&self.root)?;
        self.reconcile_snapshot(&snapshot, &mut store, &mut summary)?;
        Ok(summary)
    }

    /// One full poll of both board collections through the same pipeline.
    ///
    /// A tick that exceeds `deadline` abandons the remaining rows; they are
    /// picked up by the next scheduled tick rather than extending this one.
    pub fn poll_board(&self, deadline: Option<Instant>) -> Result<PassSummary, SyncError> {
        let mut summary = PassSummary::default();
        let mut store = LinkStore::load_at(&self.root)?;
        let now = Utc::now();

        'collections: for role in AssigneeRole::all() {
            let rows = match self.board.list_records(role) {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::error!("listing board collection {role} failed: {err}");
                    summary.errors += 1;
                    continue;
                }
            };

            for row in rows {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    tracing::warn!(
                        "poll tick hit its deadline; remaining rows deferred to next tick"
                    );
                    summary.aborted = true;
                    break 'collections;
                }

                let snapshot = match normalize_board_row(&row, role) {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        tracing::warn!("dropping malformed board row: {err}");
                        summary.malformed += 1;
                        continue;
                    }
                };

                if snapshot.status == TaskStatus::Open && !snapshot.deleted {
                    if let Some(due) = snapshot.due_at {
                        if due < now {
                            self.sink.notify(NotifyKind::TaskOverdue, &snapshot);
                        }
                    }
                }

                self.reconcile_snapshot(&snapshot, &mut store, &mut summary)?;
            }
        }

        Ok(summary)
    }

    /// Run one snapshot through resolve + dispatch, retrying once on link
    /// store contention (the contending writer's result becomes this pass's
    /// input).
    fn reconcile_snapshot(
        &self,
        snapshot: &TaskSnapshot,
        store: &mut LinkStore,
        summary: &mut PassSummary,
    ) -> Result<(), SyncError> {
        match self.reconcile_once(snapshot, store, summary) {
            Ok(()) => Ok(()),
            Err(SyncError::Store(StoreError::Contention { .. })) => {
                tracing::warn!(
                    "link store contended while reconciling {} {}; retrying on fresh state",
                    snapshot.source,
                    snapshot.source_id()
                );
                *store = LinkStore::load_at(&self.root)?;
                match self.reconcile_once(snapshot, store, summary) {
                    Ok(()) => Ok(()),
                    Err(err) => self.absorb_pair_error(snapshot, err, summary),
                }
            }
            Err(err) => self.absorb_pair_error(snapshot, err, summary),
        }
    }

    /// Pair-scoped failures are counted and logged; store-level failures
    /// abort the pass.
    fn absorb_pair_error(
        &self,
        snapshot: &TaskSnapshot,
        err: SyncError,
        summary: &mut PassSummary,
    ) -> Result<(), SyncError> {
        match err {
            SyncError::TransientWrite { .. } => {
                tracing::error!(
                    "{} {}: {err}; pair left for next pass",
                    snapshot.source,
                    snapshot.source_id()
                );
                summary.errors += 1;
                Ok(())
            }
            SyncError::TargetRejected { .. } => {
                tracing::warn!(
                    "{} {}: {err}; pair unresolved until next pass",
                    snapshot.source,
                    snapshot.source_id()
                );
                summary.unresolved += 1;
                Ok(())
            }
            err => Err(err),
        }
    }

    fn reconcile_once(
        &self,
        snapshot: &TaskSnapshot,
        store: &mut LinkStore,
        summary: &mut PassSummary,
    ) -> Result<(), SyncError> {
        let existing = store
            .lookup(snapshot.chat_id.as_ref(), snapshot.board_id.as_ref())
            .cloned();

        // Echo fast-path: skip the counterpart fetch when the incoming
        // content matches what we last wrote to/observed from this side.
        if let Some(link) = existing.as_ref() {
            if !snapshot.deleted
                && !link.tombstoned
                && link.hash_for(snapshot.source)
                    == Some(content_fingerprint(snapshot).as_str())
            {
                tracing::debug!(
                    "echo from {} {}; no-op",
                    snapshot.source,
                    snapshot.source_id()
                );
                summary.unchanged += 1;
                return Ok(());
            }
        }

        let counterpart = if snapshot.deleted {
            None
        } else {
            self.fetch_counterpart(snapshot, existing.as_ref())
        };

        let observed = ObservedPair {
            incoming: snapshot.clone(),
            counterpart,
        };
        let decision = resolve(&observed, existing.as_ref());
        tracing::info!(
            "decision for {} {}: {:?} ({})",
            snapshot.source,
            snapshot.source_id(),
            decision.action,
            decision.reason
        );

        if decision.action == SyncAction::NoOp {
            summary.unchanged += 1;
            return Ok(());
        }

        let link_id = match existing.as_ref() {
            Some(link) => link.id,
            None => store
                .ensure_link(snapshot.chat_id.as_ref(), snapshot.board_id.as_ref())
                .id(),
        };

        let outcome = dispatch::apply(
            &decision,
            &observed,
            link_id,
            store,
            self.chat.as_ref(),
            self.board.as_ref(),
            &self.retry,
        )?;

        match outcome {
            ApplyOutcome::NoOp => summary.unchanged += 1,
            ApplyOutcome::Written { target, created } => {
                store.save_at(&self.root)?;
                summary.written += 1;
                self.emit_write_notifications(&observed, target, created);
            }
            ApplyOutcome::Deleted { .. } => {
                store.save_at(&self.root)?;
                summary.tombstoned += 1;
            }
            ApplyOutcome::Unresolved { reason } => {
                tracing::warn!(
                    "{} {} left unresolved: {reason}",
                    snapshot.source,
                    snapshot.source_id()
                );
                summary.unresolved += 1;
            }
        }
        Ok(())
    }

    /// Fetch the other side's current record so the resolver sees both
    /// authoritative timestamps. Transient fetch failures degrade to
    /// "counterpart unknown"; a wrong guess is corrected next pass.
    fn fetch_counterpart(
        &self,
        snapshot: &TaskSnapshot,
        link: Option<&SyncLink>,
    ) -> Option<TaskSnapshot> {
        match snapshot.source.other() {
            Side::Board => {
                let chat_id = snapshot
                    .chat_id
                    .clone()
                    .or_else(|| link.and_then(|l| l.chat_id.clone()))?;
                match self.board.find_by_chat_id(&chat_id) {
                    Ok(Some(row)) => match normalize_board_row(&row, snapshot.role) {
                        Ok(counterpart) => Some(counterpart),
                        Err(err) => {
                            tracing::warn!("malformed board counterpart for {chat_id}: {err}");
                            None
                        }
                    },
                    Ok(None) => None,
                    Err(err) => {
                        tracing::warn!(
                            "board counterpart fetch for {chat_id} failed: {err}; \
                             treating board as unchanged"
                        );
                        None
                    }
                }
            }
            Side::Chat => {
                let chat_id = snapshot
                    .chat_id
                    .clone()
                    .or_else(|| link.and_then(|l| l.chat_id.clone()))?;
                match self.chat.get_task(&chat_id) {
                    Ok(Some(record)) => match normalize_chat_record(&record, snapshot.role) {
                        Ok(counterpart) => Some(counterpart),
                        Err(err) => {
                            tracing::warn!("malformed chat counterpart for {chat_id}: {err}");
                            None
                        }
                    },
                    Ok(None) => None,
                    Err(err) => {
                        tracing::warn!(
                            "chat counterpart fetch for {chat_id} failed: {err}; \
                             treating chat as unchanged"
                        );
                        None
                    }
                }
            }
        }
    }

    fn emit_write_notifications(&self, observed: &ObservedPair, target: Side, created: bool) {
        let Some(content) = observed.snapshot_for(target.other()) else {
            return;
        };
        if created && content.role == AssigneeRole::AssignedToMe {
            self.sink.notify(NotifyKind::AssignedToYou, content);
        }
        if !created
            && content.role == AssigneeRole::AssignedByMe
            && content.status == TaskStatus::Done
        {
            self.sink.notify(NotifyKind::YourTaskCompleted, content);
        }
    }
}
