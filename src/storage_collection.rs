//! Owns every active [`LogStorage`] on a storage node, keyed by
//! `logspace_id`, and reacts to view lifecycle events by creating or
//! finalizing the entries under it.
//!
//! Grounded on `original_source/src/log/storage.cpp`'s
//! `storage_collection_` map and its `OnViewCreated`/`OnViewFinalized`
//! hooks (inferred call pattern; the lock-per-entry discipline is carried
//! over as one `Mutex<LogStorage>` per logspace rather than one giant lock,
//! matching the source's intent of not serializing unrelated logspaces
//! behind a single mutex).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::log_storage::{FinalizeOutcome, LogStorage};
use crate::view::View;

/// A logspace's storage state behind its own lock, so operations on
/// different logspaces never contend.
pub type StorageHandle = Arc<Mutex<LogStorage>>;

#[derive(Default)]
pub struct StorageCollection {
    by_logspace: Mutex<HashMap<u32, StorageHandle>>,
}

impl StorageCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, logspace_id: u32) -> Option<StorageHandle> {
        self.by_logspace.lock().unwrap().get(&logspace_id).cloned()
    }

    pub fn get_or_create(&self, logspace_id: u32) -> StorageHandle {
        self.by_logspace
            .lock()
            .unwrap()
            .entry(logspace_id)
            .or_insert_with(|| Arc::new(Mutex::new(LogStorage::new(logspace_id))))
            .clone()
    }

    /// A new view installed: create storage entries for every logspace this
    /// node now serves under it. `sequencer_ids` names the sequencer nodes
    /// whose logspaces (`sequencer_id << 16 | view.id`) this node should now
    /// be tracking, drawn from the view's own sequencer membership.
    pub fn on_view_created(&self, view: &View) {
        for &sequencer_id in &view.sequencer_nodes {
            let logspace_id = (sequencer_id as u32) << 16 | view.id as u32;
            self.get_or_create(logspace_id);
        }
    }

    /// A view finalized: seal every logspace under it so no further
    /// REPLICATE is accepted and any reads still pending past the final
    /// metalog position fail outright. Returns each logspace's flush/fail
    /// outcome so the caller (the storage node) can write the flush to the
    /// KV backend and notify failed reads.
    pub fn on_view_finalized(&self, view: &View, final_metalog_position: u64, tail_metalogs: &[u8]) -> Vec<(u32, FinalizeOutcome)> {
        let mut outcomes = Vec::new();
        for &sequencer_id in &view.sequencer_nodes {
            let logspace_id = (sequencer_id as u32) << 16 | view.id as u32;
            if let Some(handle) = self.get(logspace_id) {
                let outcome = handle.lock().unwrap().finalize(final_metalog_position, tail_metalogs);
                outcomes.push((logspace_id, outcome));
            }
        }
        outcomes
    }

    pub fn logspace_ids(&self) -> Vec<u32> {
        self.by_logspace.lock().unwrap().keys().copied().collect()
    }
}
