//! Cluster membership snapshots ([`View`]) and the per-view "future
//! requests" holding area used while a node is waiting for a view it
//! doesn't have installed yet.
//!
//! Grounded on `original_source/src/log/storage.cpp` (`OnViewCreated`,
//! `OnViewFinalized`, the `ONHOLD_IF_FROM_FUTURE_VIEW` /
//! `IGNORE_IF_FROM_PAST_VIEW` admission guards) and
//! `original_source/src/log/engine_base.h` (`ViewWatcher`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::ids::NodeId;
use crate::protocol::SharedLogMessage;

/// Immutable membership snapshot for one logspace. Views are totally
/// ordered by `id`; a higher id always supersedes a lower one.
#[derive(Debug, Clone)]
pub struct View {
    pub id: u16,
    pub sequencer_nodes: Vec<NodeId>,
    pub engine_nodes: Vec<NodeId>,
    pub storage_nodes: Vec<NodeId>,
    pub replication_factor: u16,
}

impl View {
    pub fn contains_storage_node(&self, node_id: NodeId) -> bool {
        self.storage_nodes.contains(&node_id)
    }

    pub fn contains_engine_node(&self, node_id: NodeId) -> bool {
        self.engine_nodes.contains(&node_id)
    }
}

/// A view that has been declared final: no further replicates are accepted
/// for any logspace under it, and the metalog position it pins is the last
/// one that will ever apply.
#[derive(Debug, Clone)]
pub struct FinalizedView {
    pub view: View,
    final_metalog_positions: HashMap<u32, u64>,
    tail_metalogs: HashMap<u32, Vec<u8>>,
}

impl FinalizedView {
    pub fn new(
        view: View,
        final_metalog_positions: HashMap<u32, u64>,
        tail_metalogs: HashMap<u32, Vec<u8>>,
    ) -> Self {
        FinalizedView {
            view,
            final_metalog_positions,
            tail_metalogs,
        }
    }

    pub fn final_metalog_position(&self, logspace_id: u32) -> Option<u64> {
        self.final_metalog_positions.get(&logspace_id).copied()
    }

    pub fn tail_metalogs(&self, logspace_id: u32) -> Option<&[u8]> {
        self.tail_metalogs.get(&logspace_id).map(|v| v.as_slice())
    }
}

/// A shared-log message parked because it referenced a view that hadn't
/// been installed yet.
#[derive(Debug, Clone)]
pub struct ParkedRequest {
    pub message: SharedLogMessage,
    pub payload: Vec<u8>,
}

/// Holds messages parked by the admission guard in §4.3 until the view they
/// reference installs, replayed in FIFO arrival order per view. A generic
/// timer is deliberately not used: requests must be released exactly when
/// their view becomes current, not on a schedule.
#[derive(Debug, Default)]
pub struct FutureRequests {
    by_view: HashMap<u16, VecDeque<ParkedRequest>>,
}

impl FutureRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_hold_request(&mut self, request: ParkedRequest) {
        self.by_view
            .entry(request.message.view_id)
            .or_default()
            .push_back(request);
    }

    /// Called when a new view installs. Returns the requests parked for
    /// exactly this view, in original arrival order, if this node is a
    /// member of the view (the caller is responsible for checking
    /// membership before draining — a non-member node must drop them).
    pub fn drain_for_view(&mut self, view_id: u16) -> Vec<ParkedRequest> {
        self.by_view
            .remove(&view_id)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    /// Drops every request parked for a view id that can never become
    /// current again because a newer view already installed without this
    /// node as a member for it; called after learning the node is not a
    /// member of `view_id`.
    pub fn drop_for_view(&mut self, view_id: u16) {
        self.by_view.remove(&view_id);
    }

    pub fn pending_view_ids(&self) -> Vec<u16> {
        self.by_view.keys().copied().collect()
    }
}

/// Outcome of applying the admission guards to an inbound shared-log
/// message against the node's current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Message references a view at or behind the current one; proceed.
    Admit,
    /// Message is from a view not yet installed; park it.
    Park,
    /// Message is from a view older than the current one; drop it.
    Drop,
}

/// Applies the two-guard sequence from `storage.cpp`: park if the message
/// is from a future view (or there is no current view at all), drop if
/// it's from a past view, otherwise admit.
pub fn admit(current_view_id: Option<u16>, message_view_id: u16) -> AdmissionDecision {
    match current_view_id {
        None => AdmissionDecision::Park,
        Some(current) if message_view_id > current => AdmissionDecision::Park,
        Some(current) if message_view_id < current => AdmissionDecision::Drop,
        Some(_) => AdmissionDecision::Admit,
    }
}

/// A one-sided variant used for `READ_AT`, which only parks on a future
/// view and otherwise falls through to a direct backend lookup even for a
/// past view, matching `Storage::HandleReadAtRequest`.
pub fn admit_read_at(current_view_id: Option<u16>, message_view_id: u16) -> AdmissionDecision {
    match current_view_id {
        None => AdmissionDecision::Park,
        Some(current) if message_view_id > current => AdmissionDecision::Park,
        _ => AdmissionDecision::Admit,
    }
}

/// Read-mostly handle to the node's current view, shared between the
/// view-watcher task (the sole writer) and every inbound message handler
/// (readers). Backed by a `tokio::sync::watch` channel so readers observe
/// updates without taking a lock on the hot path.
#[derive(Clone)]
pub struct ViewWatcher {
    rx: tokio::sync::watch::Receiver<Option<Arc<View>>>,
}

pub struct ViewWatcherHandle {
    tx: tokio::sync::watch::Sender<Option<Arc<View>>>,
}

impl ViewWatcherHandle {
    pub fn new() -> (Self, ViewWatcher) {
        let (tx, rx) = tokio::sync::watch::channel(None);
        (ViewWatcherHandle { tx }, ViewWatcher { rx })
    }

    /// Installs a new view. Panics if the caller attempts to regress the
    /// view id — that is a durability-invariant violation the caller must
    /// have already ruled out before calling this.
    pub fn install_view(&self, view: View) {
        let current_id = self.tx.borrow().as_ref().map(|v| v.id);
        if let Some(current_id) = current_id {
            assert!(view.id > current_id, "view ids must be strictly increasing");
        }
        let _ = self.tx.send(Some(Arc::new(view)));
    }
}

impl ViewWatcher {
    pub fn current(&self) -> Option<Arc<View>> {
        self.rx.borrow().clone()
    }

    pub fn current_view_id(&self) -> Option<u16> {
        self.rx.borrow().as_ref().map(|v| v.id)
    }

    /// Resolves once a view with the given id (or newer) is installed.
    pub async fn wait_for_view(&mut self, view_id: u16) -> Arc<View> {
        loop {
            if let Some(view) = self.current() {
                if view.id >= view_id {
                    return view;
                }
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped; nothing left to wait for. Spin on the
                // last-known snapshot rather than hang forever.
                if let Some(view) = self.current() {
                    return view;
                }
            }
        }
    }
}
