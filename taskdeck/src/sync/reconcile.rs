//! Server-wins reconciliation of the local store against a snapshot.
//!
//! Pure with respect to I/O: the engine calls [`reconcile`] with its state
//! lock held and persists afterwards.

use std::collections::HashSet;

use taskdeck_proto::task::{TaskId, TaskRecord};

use crate::store::LocalStore;

/// What a reconcile changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Server-only records added locally.
    pub inserted: usize,
    /// Local records overwritten with differing server content.
    pub updated: usize,
    /// Local-only records pruned.
    pub removed: usize,
    /// Protected local records left untouched.
    pub kept: usize,
}

impl ReconcileReport {
    /// Returns `true` if the store was not modified.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Makes `store` match `server`, key by key.
///
/// - A key on both sides takes the server content. A local `category`
///   survives when the server copy has none.
/// - Server-only keys are appended in server order.
/// - Local-only keys are removed.
///
/// Keys in `protected` carry local changes newer than the snapshot: they
/// are neither overwritten, nor pruned, nor brought back if deleted
/// locally. Duplicate keys in `server` keep their first occurrence.
pub fn reconcile(
    store: &mut LocalStore,
    server: Vec<TaskRecord>,
    protected: &HashSet<TaskId>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut seen: HashSet<TaskId> = HashSet::with_capacity(server.len());

    for mut incoming in server {
        if !seen.insert(incoming.id.clone()) {
            tracing::warn!(id = %incoming.id, "duplicate id in server list, keeping the first");
            continue;
        }
        if protected.contains(&incoming.id) {
            continue;
        }
        match store.get(&incoming.id) {
            Some(local) => {
                if incoming.category.is_none() {
                    incoming.category = local.category;
                }
                if !local.approx_eq(&incoming) {
                    store.update(incoming);
                    report.updated += 1;
                }
            }
            None => {
                store.add(incoming);
                report.inserted += 1;
            }
        }
    }

    let stale: Vec<TaskId> = store
        .ids()
        .filter(|id| !seen.contains(*id) && !protected.contains(*id))
        .cloned()
        .collect();
    for id in &stale {
        store.remove(id);
    }
    report.removed = stale.len();
    report.kept = store.ids().filter(|id| protected.contains(*id)).count();

    tracing::debug!(
        inserted = report.inserted,
        updated = report.updated,
        removed = report.removed,
        kept = report.kept,
        "reconciled local store"
    );
    report
}
