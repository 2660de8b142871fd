//! PolicyCommitService: keeps the host's installed rule lists in step with
//! the local [`PolicyStore`].
//!
//! Every mutating operation follows the same shape:
//!
//! ```text
//! mutate store ──► rebuild master list ──► install on host
//!                                              │
//!                              failure ◄───────┘
//!                                 │
//!                     add:    unregister the new list, return error
//!                     remove: keep the removal, return error
//! ```
//!
//! # Why add and remove fail differently
//!
//! A failed *add* must not leave a registered list that the host never
//! received: every later master list would include it.  A failed *remove*
//! keeps the removal because that is the state the caller asked for; the
//! host is simply behind until the next successful push.
//!
//! # Serialisation
//!
//! The host's state is a function of the whole master list, not of the
//! delta.  Two overlapping operations on one category could otherwise push
//! their master lists out of order and leave a stale one installed.  Each
//! category therefore has an async commit lock held from the store mutation
//! until the install call returns.  The store itself sits behind a plain
//! mutex that is only ever held for synchronous work, never across an
//! `.await`.
//!
//! # Local-only removal
//!
//! `remove_policies(.., commit = false)` updates the store without calling
//! the host.  The category is then marked out of sync ([`is_synced`]
//! returns `false`) until any later push: every push sends the complete
//! current master list, so it folds in all pending local-only removals.
//!
//! [`is_synced`]: PolicyCommitService::is_synced

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use keyhold_core::{Category, KeyId, ListId, Modifiers, PolicyStore, Propagation, ProtocolError, Rule};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Target for the diagnostic emitted when a rollback cannot be applied.
pub const ROLLBACK_TARGET: &str = "keyhold::rollback";

/// Error returned by a [`PolicySink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// The host answered but refused the command.
    #[error("host rejected command: {0}")]
    Rejected(String),

    /// The connection to the host failed.
    #[error("host I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The host sent bytes that are not a valid reply.
    #[error("host protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The host did not answer in time.
    #[error("host did not reply within {0:?}")]
    Timeout(Duration),

    /// The connection is closed or no longer usable.
    #[error("host connection closed")]
    Closed,
}

/// Error type for the commit service.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A remove referenced a list that is not registered.
    #[error("no {category} policy list with id {id}")]
    NotFound { category: Category, id: ListId },

    /// The host rejected or could not apply a master list.
    #[error("failed to install {category} policy on host: {source}")]
    InstallFailed {
        category: Category,
        #[source]
        source: SinkError,
    },

    /// The host's default propagation mode could not be set.
    #[error("failed to set default propagation mode on host: {source}")]
    DefaultModeFailed {
        #[source]
        source: SinkError,
    },

    /// Undoing a registration after a failed install found nothing to undo.
    ///
    /// Never returned to callers; it is logged on [`ROLLBACK_TARGET`] and
    /// counted by [`PolicyCommitService::rollback_failures`].
    #[error("rollback of {category} policy list {id} failed: list already absent")]
    RollbackFailed { category: Category, id: ListId },
}

/// The host-side collaborator that installs master lists.
///
/// Implementations must replace the host's active list atomically and be
/// idempotent when called twice with the same list.  The production
/// implementation frames commands over a byte stream; tests use recording
/// doubles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicySink: Send + Sync {
    /// Replaces the host's keyboard rule list with `rules`.
    async fn install_keyboard_policy(&self, rules: Vec<Rule>) -> Result<(), SinkError>;

    /// Replaces the host's pointer rule list with `rules`.
    async fn install_pointer_policy(&self, rules: Vec<Rule>) -> Result<(), SinkError>;

    /// Sets what the host does with events no rule matches.
    async fn set_default_propagation_mode(&self, mode: Propagation) -> Result<(), SinkError>;
}

/// The commit service.
///
/// Owns the injected [`PolicyStore`]; construct one per host connection and
/// share it behind an `Arc`.
pub struct PolicyCommitService {
    store: Mutex<PolicyStore>,
    commit_locks: [tokio::sync::Mutex<()>; 2],
    out_of_sync: [AtomicBool; 2],
    rollback_failures: AtomicU64,
    sink: Arc<dyn PolicySink>,
}

impl PolicyCommitService {
    /// Creates a service around `store`, pushing through `sink`.
    ///
    /// A category whose partition is already non-empty starts out of sync,
    /// since the host has not been told about those lists yet.
    pub fn new(store: PolicyStore, sink: Arc<dyn PolicySink>) -> Self {
        let out_of_sync = Category::ALL.map(|c| AtomicBool::new(!store.is_empty(c)));
        Self {
            store: Mutex::new(store),
            commit_locks: [tokio::sync::Mutex::new(()), tokio::sync::Mutex::new(())],
            out_of_sync,
            rollback_failures: AtomicU64::new(0),
            sink,
        }
    }

    // ── Startup ───────────────────────────────────────────────────────────────

    /// Sets the host's default mode to "suppress unless a rule says otherwise".
    ///
    /// Call once, before installing any list.  Calling it later is not an
    /// error: lists already registered are left untouched and only a warning
    /// is logged.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::DefaultModeFailed`] if the host refuses.
    pub async fn run_startup_defaults(&self) -> Result<(), PolicyError> {
        // Keyboard before pointer, the same order everywhere locks are nested.
        let _keyboard = self.commit_locks[Category::Keyboard.index()].lock().await;
        let _pointer = self.commit_locks[Category::Pointer.index()].lock().await;

        {
            let store = self.store();
            if Category::ALL.iter().any(|&c| !store.is_empty(c)) {
                warn!("startup defaults applied after policy lists were registered");
            }
        }

        self.sink
            .set_default_propagation_mode(Propagation::Suppress)
            .await
            .map_err(|source| PolicyError::DefaultModeFailed { source })?;
        info!(mode = %Propagation::Suppress, "host default propagation mode set");
        Ok(())
    }

    // ── Generic operations ───────────────────────────────────────────────────

    /// Registers `rules` under `category` and installs the new master list.
    ///
    /// On success returns the handle for [`remove_policies`](Self::remove_policies).
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InstallFailed`] if the host refuses the new
    /// master list.  The registration is undone before returning, so the
    /// store is left exactly as it was, and the category is marked out of
    /// sync until the next successful push.
    pub async fn add_policies(&self, category: Category, rules: Vec<Rule>) -> Result<ListId, PolicyError> {
        let _commit = self.commit_locks[category.index()].lock().await;
        self.add_locked(category, rules).await
    }

    /// Unregisters list `id`; when `commit` is set, also installs the new
    /// master list.
    ///
    /// With `commit == false` the host is not contacted and keeps the old
    /// list until a later push.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::NotFound`] if `id` is not registered; nothing is
    ///   changed and the host is not contacted.
    /// - [`PolicyError::InstallFailed`] if the push fails.  The removal is
    ///   kept.
    pub async fn remove_policies(&self, category: Category, id: ListId, commit: bool) -> Result<(), PolicyError> {
        let _commit = self.commit_locks[category.index()].lock().await;
        self.remove_locally(category, id)?;
        if !commit {
            return Ok(());
        }
        self.push_locked(category).await
    }

    /// Installs the current master list for `category` without changing the
    /// store.  Use after local-only removals to bring the host up to date.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InstallFailed`] if the push fails.
    pub async fn commit(&self, category: Category) -> Result<(), PolicyError> {
        let _commit = self.commit_locks[category.index()].lock().await;
        self.push_locked(category).await
    }

    /// Swaps list `old` for a new list of `rules` with a single push.
    ///
    /// Equivalent to a local-only remove of `old` followed by
    /// [`add_policies`](Self::add_policies), without another operation on the
    /// category slipping in between.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::NotFound`] if `old` is not registered; nothing is
    ///   changed.
    /// - [`PolicyError::InstallFailed`] if the push fails.  The new list is
    ///   rolled back; the removal of `old` is kept and the category stays
    ///   out of sync.
    pub async fn replace_policies(
        &self,
        category: Category,
        old: ListId,
        rules: Vec<Rule>,
    ) -> Result<ListId, PolicyError> {
        let _commit = self.commit_locks[category.index()].lock().await;
        self.remove_locally(category, old)?;
        self.add_locked(category, rules).await
    }

    // ── Per-category entry points ────────────────────────────────────────────

    pub async fn add_keyboard_policies(&self, rules: Vec<Rule>) -> Result<ListId, PolicyError> {
        self.add_policies(Category::Keyboard, rules).await
    }

    pub async fn remove_keyboard_policies(&self, id: ListId, commit: bool) -> Result<(), PolicyError> {
        self.remove_policies(Category::Keyboard, id, commit).await
    }

    pub async fn add_pointer_policies(&self, rules: Vec<Rule>) -> Result<ListId, PolicyError> {
        self.add_policies(Category::Pointer, rules).await
    }

    pub async fn remove_pointer_policies(&self, id: ListId, commit: bool) -> Result<(), PolicyError> {
        self.remove_policies(Category::Pointer, id, commit).await
    }

    /// Installs a single keyboard rule for key-down events of `key` with
    /// `modifiers` held, propagating it when `propagate` is set and
    /// suppressing it otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`add_policies`](Self::add_policies).
    pub async fn add_keydown_policy(
        &self,
        propagate: bool,
        key: KeyId,
        modifiers: Modifiers,
    ) -> Result<ListId, PolicyError> {
        let rule = Rule::keydown(Propagation::from_flag(propagate), key, modifiers);
        self.add_keyboard_policies(vec![rule]).await
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// The master list the store currently describes for `category`.
    ///
    /// May be ahead of the host after local-only removals or failed pushes.
    pub fn master_policy_list(&self, category: Category) -> Vec<Rule> {
        self.store().master_policy_list(category)
    }

    /// IDs currently registered under `category`, ascending.
    pub fn list_ids(&self, category: Category) -> Vec<ListId> {
        self.store().list_ids(category)
    }

    /// `true` when the last push for `category` succeeded and nothing has
    /// changed locally since.
    pub fn is_synced(&self, category: Category) -> bool {
        !self.out_of_sync[category.index()].load(Ordering::Acquire)
    }

    /// Number of rollbacks that found nothing to undo.
    pub fn rollback_failures(&self) -> u64 {
        self.rollback_failures.load(Ordering::Relaxed)
    }

    // ── Internals (commit lock held by caller) ───────────────────────────────

    async fn add_locked(&self, category: Category, rules: Vec<Rule>) -> Result<ListId, PolicyError> {
        let rule_count = rules.len();
        let (id, master) = {
            let mut store = self.store();
            let id = store.add_policy_list(category, rules);
            (id, store.master_policy_list(category))
        };
        debug!(%category, list_id = %id, rules = rule_count, "policy list registered");

        if let Err(source) = self.install(category, master).await {
            warn!(%category, list_id = %id, error = %source, "install failed; rolling back registration");
            self.roll_back(category, id);
            // The host may or may not have applied the frame.
            self.out_of_sync[category.index()].store(true, Ordering::Release);
            return Err(PolicyError::InstallFailed { category, source });
        }
        self.mark_synced(category);
        Ok(id)
    }

    fn remove_locally(&self, category: Category, id: ListId) -> Result<(), PolicyError> {
        if !self.store().remove_policy_list(category, id) {
            debug!(%category, list_id = %id, "remove of unknown policy list");
            return Err(PolicyError::NotFound { category, id });
        }
        self.out_of_sync[category.index()].store(true, Ordering::Release);
        debug!(%category, list_id = %id, "policy list unregistered");
        Ok(())
    }

    async fn push_locked(&self, category: Category) -> Result<(), PolicyError> {
        let master = self.store().master_policy_list(category);
        if let Err(source) = self.install(category, master).await {
            warn!(%category, error = %source, "install failed; host is behind local state");
            self.out_of_sync[category.index()].store(true, Ordering::Release);
            return Err(PolicyError::InstallFailed { category, source });
        }
        self.mark_synced(category);
        Ok(())
    }

    async fn install(&self, category: Category, master: Vec<Rule>) -> Result<(), SinkError> {
        debug!(%category, rules = master.len(), "pushing master policy list");
        match category {
            Category::Keyboard => self.sink.install_keyboard_policy(master).await,
            Category::Pointer => self.sink.install_pointer_policy(master).await,
        }
    }

    /// Best-effort undo of a registration whose install failed.
    ///
    /// A failure here is swallowed so it never replaces the install error,
    /// but it is reported: it means the store and host may disagree.
    fn roll_back(&self, category: Category, id: ListId) {
        if self.store().remove_policy_list(category, id) {
            return;
        }
        let err = PolicyError::RollbackFailed { category, id };
        self.rollback_failures.fetch_add(1, Ordering::Relaxed);
        warn!(target: ROLLBACK_TARGET, %category, list_id = %id, error = %err, "policy state may diverge from host");
    }

    fn mark_synced(&self, category: Category) {
        self.out_of_sync[category.index()].store(false, Ordering::Release);
    }

    fn store(&self) -> MutexGuard<'_, PolicyStore> {
        // Store operations cannot leave it half-updated, so a poisoned lock is still usable.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
