//! Tracks per-engine-node outstanding-call counts and picks a target node
//! for dispatch. Grounded on `spec.md` §4.2's weighted-round-robin
//! selection rule and `original_source/src/gateway/server.h`'s
//! `NodeManager` role (declared there, not expanded in the excerpt).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::ids::NodeId;

#[derive(Debug, Clone, Copy)]
struct NodeSlot {
    capacity: u32,
    outstanding: u32,
}

impl NodeSlot {
    fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            f64::INFINITY
        } else {
            self.outstanding as f64 / self.capacity as f64
        }
    }

    fn has_capacity(&self) -> bool {
        self.outstanding < self.capacity
    }
}

/// Tracks engine nodes registered for a function and their live
/// outstanding-call counts. Selection is weighted round robin biased toward
/// lowest utilization, ties broken by node id ascending (§4.2).
#[derive(Default)]
pub struct NodeManager {
    nodes: Mutex<HashMap<NodeId, NodeSlot>>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node(&self, node_id: NodeId, capacity: u32) {
        self.nodes.lock().unwrap().insert(
            node_id,
            NodeSlot {
                capacity,
                outstanding: 0,
            },
        );
    }

    pub fn unregister_node(&self, node_id: NodeId) {
        self.nodes.lock().unwrap().remove(&node_id);
    }

    /// Picks the least-utilized node with spare capacity, ties broken by
    /// ascending node id, and reserves a slot on it. Returns `None` if no
    /// node currently has capacity.
    pub fn pick_and_reserve(&self) -> Option<NodeId> {
        let mut nodes = self.nodes.lock().unwrap();
        let chosen = nodes
            .iter()
            .filter(|(_, slot)| slot.has_capacity())
            .min_by(|(id_a, slot_a), (id_b, slot_b)| {
                slot_a
                    .utilization()
                    .partial_cmp(&slot_b.utilization())
                    .unwrap()
                    .then(id_a.cmp(id_b))
            })
            .map(|(id, _)| *id);

        if let Some(id) = chosen {
            nodes.get_mut(&id).unwrap().outstanding += 1;
        }
        chosen
    }

    /// Releases a previously reserved slot, e.g. on completion or discard.
    pub fn release(&self, node_id: NodeId) {
        if let Some(slot) = self.nodes.lock().unwrap().get_mut(&node_id) {
            slot.outstanding = slot.outstanding.saturating_sub(1);
        }
    }

    pub fn outstanding(&self, node_id: NodeId) -> Option<u32> {
        self.nodes.lock().unwrap().get(&node_id).map(|s| s.outstanding)
    }
}
