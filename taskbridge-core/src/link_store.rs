//! Link store — durable identity mapping between chat tasks and board records.
//!
//! Persists a JSON document at `<root>/.taskbridge/links.json`.
//! Writes use an atomic `.tmp` + rename pattern, mode 0600. Every load/save
//! pair is generation-checked: if another writer (say, a CLI invocation racing
//! the daemon) saved in between, [`save_at`](LinkStore::save_at) fails with
//! [`StoreError::Contention`] and the caller retries its pass on fresh state.
//!
//! # API pattern
//!
//! Persistence functions come in two forms:
//! - `fn_at(root: &Path, …)` — explicit root; used in tests with `TempDir`
//! - `fn(…)` — derives the root from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::{BoardRecordId, ChatTaskId, LinkId, Side, SyncLink};

/// On-disk and in-memory link store document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkStore {
    /// Monotonic save counter; the optimistic concurrency token.
    #[serde(default)]
    pub generation: u64,
    /// Timestamp of the last successful save.
    pub synced_at: DateTime<Utc>,
    /// Next surrogate id to hand out.
    #[serde(default = "default_next_link")]
    next_link: u64,
    #[serde(default)]
    links: Vec<SyncLink>,
}

fn default_next_link() -> u64 {
    1
}

/// Minimal probe used to read only the generation of the on-disk file.
#[derive(Debug, Deserialize)]
struct GenerationProbe {
    #[serde(default)]
    generation: u64,
}

/// Path to the link store JSON, rooted at `root`.
///
/// `<root>/.taskbridge/links.json`
pub fn store_path_at(root: &Path) -> PathBuf {
    root.join(".taskbridge").join("links.json")
}

/// Outcome of [`LinkStore::ensure_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A fresh link was created for a pair never seen before.
    Created(LinkId),
    /// An existing link matched one of the ids.
    Existing(LinkId),
    /// Two one-sided links turned out to describe the same pair and were
    /// merged into the older of the two.
    Merged(LinkId),
}

impl EnsureOutcome {
    pub fn id(self) -> LinkId {
        match self {
            EnsureOutcome::Created(id)
            | EnsureOutcome::Existing(id)
            | EnsureOutcome::Merged(id) => id,
        }
    }
}

impl LinkStore {
    /// An empty store, generation 0 (never saved).
    pub fn empty() -> Self {
        Self {
            generation: 0,
            synced_at: Utc::now(),
            next_link: 1,
            links: Vec::new(),
        }
    }

    /// Load the link store rooted at `root`.
    ///
    /// Returns an empty store if the file does not yet exist — a lookup miss
    /// later is the signal to mirror a task, not an error.
    pub fn load_at(root: &Path) -> Result<Self, StoreError> {
        let path = store_path_at(root);
        if !path.exists() {
            return Ok(Self::empty());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
    }

    /// `load_at` convenience wrapper rooted at the home directory.
    pub fn load() -> Result<Self, StoreError> {
        Self::load_at(&home()?)
    }

    /// Save the store atomically, bumping its generation.
    ///
    /// Fails with [`StoreError::Contention`] when the on-disk generation no
    /// longer matches the generation this store was loaded with.
    pub fn save_at(&mut self, root: &Path) -> Result<(), StoreError> {
        let path = store_path_at(root);
        let Some(dir) = path.parent() else {
            return Err(io_err(
                path,
                std::io::Error::other("invalid link store path"),
            ));
        };

        if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            let probe: GenerationProbe = serde_json::from_str(&contents)
                .map_err(|e| StoreError::Parse {
                    path: path.clone(),
                    source: e,
                })?;
            if probe.generation != self.generation {
                return Err(StoreError::Contention {
                    path,
                    disk: probe.generation,
                    ours: self.generation,
                });
            }
        }

        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        self.generation += 1;
        self.synced_at = Utc::now();

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    /// `save_at` convenience wrapper rooted at the home directory.
    pub fn save(&mut self) -> Result<(), StoreError> {
        self.save_at(&home()?)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Exact-match lookup on whichever external id is known.
    pub fn lookup(
        &self,
        chat_id: Option<&ChatTaskId>,
        board_id: Option<&BoardRecordId>,
    ) -> Option<&SyncLink> {
        self.links.iter().find(|link| {
            chat_id.is_some_and(|id| link.chat_id.as_ref() == Some(id))
                || board_id.is_some_and(|id| link.board_id.as_ref() == Some(id))
        })
    }

    /// Fetch a link by surrogate id.
    pub fn get(&self, id: LinkId) -> Option<&SyncLink> {
        self.links.iter().find(|link| link.id == id)
    }

    /// All links, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncLink> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn tombstoned_count(&self) -> usize {
        self.links.iter().filter(|l| l.tombstoned).count()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Resolve the link for a pair, creating it at most once.
    ///
    /// A second attempt for the same pair resolves to the existing link. When
    /// the two ids match two distinct one-sided links, the newer is folded
    /// into the older so a pair is never represented twice.
    pub fn ensure_link(
        &mut self,
        chat_id: Option<&ChatTaskId>,
        board_id: Option<&BoardRecordId>,
    ) -> EnsureOutcome {
        let by_chat = chat_id.and_then(|id| {
            self.links
                .iter()
                .position(|l| l.chat_id.as_ref() == Some(id))
        });
        let by_board = board_id.and_then(|id| {
            self.links
                .iter()
                .position(|l| l.board_id.as_ref() == Some(id))
        });

        match (by_chat, by_board) {
            (Some(a), Some(b)) if a != b => EnsureOutcome::Merged(self.merge(a, b)),
            (Some(idx), _) | (_, Some(idx)) => {
                let link = &mut self.links[idx];
                if link.chat_id.is_none() {
                    link.chat_id = chat_id.cloned();
                }
                if link.board_id.is_none() {
                    link.board_id = board_id.cloned();
                }
                EnsureOutcome::Existing(link.id)
            }
            (None, None) => {
                let id = LinkId(self.next_link);
                self.next_link += 1;
                self.links
                    .push(SyncLink::new(id, chat_id.cloned(), board_id.cloned()));
                EnsureOutcome::Created(id)
            }
        }
    }

    /// Fold the younger of two links into the older one and drop it.
    fn merge(&mut self, a: usize, b: usize) -> LinkId {
        let (keep, drop) = if self.links[a].id <= self.links[b].id {
            (a, b)
        } else {
            (b, a)
        };
        let dropped = self.links[drop].clone();
        let kept = &mut self.links[keep];
        if kept.chat_id.is_none() {
            kept.chat_id = dropped.chat_id;
        }
        if kept.board_id.is_none() {
            kept.board_id = dropped.board_id;
        }
        if kept.last_synced_hash_chat.is_none() {
            kept.last_synced_hash_chat = dropped.last_synced_hash_chat;
        }
        if kept.last_synced_hash_board.is_none() {
            kept.last_synced_hash_board = dropped.last_synced_hash_board;
        }
        if kept.last_synced_at_chat.is_none() {
            kept.last_synced_at_chat = dropped.last_synced_at_chat;
        }
        if kept.last_synced_at_board.is_none() {
            kept.last_synced_at_board = dropped.last_synced_at_board;
        }
        kept.tombstoned = kept.tombstoned || dropped.tombstoned;
        let id = kept.id;
        self.links.remove(drop);
        id
    }

    /// Record a confirmed write (or confirmed observation) for one side.
    ///
    /// Updates only the named side's fields; the other side's bookkeeping is
    /// never touched. Returns `false` if the link id is unknown.
    pub fn record_confirmed_write(
        &mut self,
        id: LinkId,
        side: Side,
        new_external_id: Option<&str>,
        new_hash: &str,
        new_at: DateTime<Utc>,
    ) -> bool {
        let Some(link) = self.links.iter_mut().find(|l| l.id == id) else {
            return false;
        };
        match side {
            Side::Chat => {
                if let Some(ext) = new_external_id {
                    link.chat_id = Some(ChatTaskId::from(ext));
                }
                link.last_synced_hash_chat = Some(new_hash.to_owned());
                link.last_synced_at_chat = Some(new_at);
            }
            Side::Board => {
                if let Some(ext) = new_external_id {
                    link.board_id = Some(BoardRecordId::from(ext));
                }
                link.last_synced_hash_board = Some(new_hash.to_owned());
                link.last_synced_at_board = Some(new_at);
            }
        }
        true
    }

    /// Mark a link tombstoned. Idempotent; repeated calls are no-ops.
    pub fn mark_tombstoned(&mut self, id: LinkId) -> bool {
        let Some(link) = self.links.iter_mut().find(|l| l.id == id) else {
            return false;
        };
        link.tombstoned = true;
        true
    }
}

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
