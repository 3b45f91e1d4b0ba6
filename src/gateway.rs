//! The gateway's call dispatcher: admits a func call from an HTTP or gRPC
//! handler, picks a node to run it on (or queues it if every node is at
//! capacity), and routes the eventual completion or failure back to the
//! caller. Node selection and per-function statistics are delegated to
//! [`crate::node_manager::NodeManager`] and [`crate::gateway_stats::GatewayStats`].
//!
//! Grounded on `original_source/src/gateway/server.h`'s `Server` class:
//! `FuncCallState`, the `running_func_calls_`/`pending_func_calls_`/
//! `discarded_func_calls_` triple, and `OnNewFuncCallCommon`/
//! `DispatchFuncCall`/`TryDispatchingPendingFuncCalls`/`FinishFuncCall`/
//! `DiscardFuncCall`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::func_config::FuncConfig;
use crate::gateway_stats::GatewayStats;
use crate::ids::{ConnectionId, FuncCall, FullCallId, NodeId};
use crate::node_manager::NodeManager;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GatewayError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("unknown method {method} for function {func}")]
    UnknownMethod { func: String, method: String },
    #[error("admission refused: pending queue already at capacity ({0})")]
    ResourceExhausted(usize),
}

#[derive(Debug, Clone)]
pub enum FuncCallOutcome {
    Completed(Vec<u8>),
    Failed,
    Discarded,
}

struct FuncCallState {
    func_call: FuncCall,
    func_name: String,
    connection_id: Option<ConnectionId>,
    recv_timestamp_us: i64,
    dispatch_timestamp_us: Option<i64>,
    payload: Vec<u8>,
    response_tx: Option<oneshot::Sender<FuncCallOutcome>>,
    /// Set once a node has been picked and reserved for this call, so a
    /// timeout can release the right node's capacity without the caller
    /// needing to have tracked it independently.
    node_id: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched(NodeId),
    Queued,
}

/// Everything an engine-connection writer needs to send a dispatched call
/// out onto the wire.
pub struct DispatchedCall {
    pub node_id: NodeId,
    pub func_call: FuncCall,
    pub payload: Vec<u8>,
}

pub struct Gateway {
    func_config: Arc<FuncConfig>,
    node_manager: Arc<NodeManager>,
    stats: Arc<GatewayStats>,
    running: std::sync::Mutex<HashMap<u64, FuncCallState>>,
    pending: std::sync::Mutex<VecDeque<FuncCallState>>,
    discarded: std::sync::Mutex<HashSet<u64>>,
    next_call_id: AtomicU32,
    max_pending: usize,
}

impl Gateway {
    pub fn new(func_config: Arc<FuncConfig>, node_manager: Arc<NodeManager>, stats: Arc<GatewayStats>, max_pending: usize) -> Self {
        Gateway {
            func_config,
            node_manager,
            stats,
            running: std::sync::Mutex::new(HashMap::new()),
            pending: std::sync::Mutex::new(VecDeque::new()),
            discarded: std::sync::Mutex::new(HashSet::new()),
            next_call_id: AtomicU32::new(0),
            max_pending,
        }
    }

    /// Admits a new func call. Returns the oneshot receiver the caller
    /// should await for the eventual outcome, a dispatch instruction if a
    /// node had capacity right away, and the call's id so the caller can
    /// clean up on a dispatch timeout. Refuses admission with
    /// `ResourceExhausted` rather than growing the pending queue without
    /// bound once it is already at capacity.
    pub fn new_func_call(
        &self,
        func_name: &str,
        method_name: &str,
        client_id: u16,
        connection_id: Option<ConnectionId>,
        payload: Vec<u8>,
        now_us: i64,
    ) -> Result<(oneshot::Receiver<FuncCallOutcome>, Option<DispatchedCall>, FullCallId), GatewayError> {
        let (func_id, method_id) = self
            .func_config
            .resolve_method(func_name, method_name)
            .ok_or_else(|| {
                if self.func_config.resolve(func_name).is_none() {
                    GatewayError::UnknownFunction(func_name.to_string())
                } else {
                    GatewayError::UnknownMethod {
                        func: func_name.to_string(),
                        method: method_name.to_string(),
                    }
                }
            })?;

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let func_call = FuncCall {
            func_id,
            method_id,
            client_id,
            call_id,
        };
        let full_call_id = func_call.full_call_id();
        self.stats.tick_new_func_call(func_id, func_name, now_us);

        let (tx, rx) = oneshot::channel();
        let state = FuncCallState {
            func_call,
            func_name: func_name.to_string(),
            connection_id,
            recv_timestamp_us: now_us,
            dispatch_timestamp_us: None,
            payload,
            response_tx: Some(tx),
            node_id: None,
        };

        match self.try_dispatch_one(state, now_us) {
            Ok(dispatched) => Ok((rx, dispatched, full_call_id)),
            Err(_state) => Err(GatewayError::ResourceExhausted(self.max_pending)),
        }
    }

    /// Picks a node and dispatches immediately if one has capacity;
    /// otherwise queues the call, refusing (by handing `state` back) once
    /// `pending` is already at `max_pending`.
    fn try_dispatch_one(&self, mut state: FuncCallState, now_us: i64) -> Result<Option<DispatchedCall>, FuncCallState> {
        match self.node_manager.pick_and_reserve() {
            Some(node_id) => {
                let queueing_delay_us = (now_us - state.recv_timestamp_us).max(0) as u64;
                state.dispatch_timestamp_us = Some(now_us);
                state.node_id = Some(node_id);
                self.stats.record_dispatch(&state.func_name, queueing_delay_us, 0);
                let dispatched = DispatchedCall {
                    node_id,
                    func_call: state.func_call,
                    payload: state.payload.clone(),
                };
                self.running
                    .lock()
                    .unwrap()
                    .insert(state.func_call.full_call_id().as_u64(), state);
                Ok(Some(dispatched))
            }
            None => {
                let mut pending = self.pending.lock().unwrap();
                if pending.len() >= self.max_pending {
                    drop(pending);
                    return Err(state);
                }
                pending.push_back(state);
                Ok(None)
            }
        }
    }

    /// Call periodically (or whenever a node's capacity frees up) to drain
    /// the pending queue in FIFO order, matching
    /// `TryDispatchingPendingFuncCalls`.
    pub fn try_dispatch_pending(&self, now_us: i64) -> Vec<DispatchedCall> {
        let mut dispatched = Vec::new();
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            let Some(state) = next else { break };
            let full_call_id = state.func_call.full_call_id().as_u64();
            if self.discarded.lock().unwrap().remove(&full_call_id) {
                continue;
            }
            match self.try_dispatch_one(state, now_us) {
                Ok(Some(call)) => dispatched.push(call),
                Ok(None) | Err(_) => break,
            }
        }
        dispatched
    }

    /// An engine reported completion (or failure) for a previously
    /// dispatched call.
    pub fn finish_func_call(&self, node_id: NodeId, full_call_id: FullCallId, result: FuncCallOutcome, now_us: i64) {
        self.node_manager.release(node_id);
        let state = self.running.lock().unwrap().remove(&full_call_id.as_u64());
        let Some(mut state) = state else {
            return;
        };
        if self.discarded.lock().unwrap().remove(&full_call_id.as_u64()) {
            return;
        }
        let end2end_delay_us = (now_us - state.recv_timestamp_us).max(0) as u64;
        self.stats.record_completion(state.func_call.func_id, &state.func_name, end2end_delay_us);
        if let Some(tx) = state.response_tx.take() {
            let _ = tx.send(result);
        }
    }

    /// A dispatch timed out before the engine replied. Removes the call
    /// from `running` (or `pending`, if it never got dispatched at all),
    /// releases any node capacity it was holding, and drains the pending
    /// queue so whatever capacity just freed up gets used. Returns the
    /// calls newly dispatched as a result, for the caller to send out.
    pub fn timeout_func_call(&self, full_call_id: FullCallId, now_us: i64) -> Vec<DispatchedCall> {
        let state = self.running.lock().unwrap().remove(&full_call_id.as_u64());
        if let Some(state) = state {
            if self.discarded.lock().unwrap().remove(&full_call_id.as_u64()) {
                return Vec::new();
            }
            if let Some(node_id) = state.node_id {
                self.node_manager.release(node_id);
            }
            return self.try_dispatch_pending(now_us);
        }

        let mut pending = self.pending.lock().unwrap();
        if let Some(idx) = pending
            .iter()
            .position(|s| s.func_call.full_call_id().as_u64() == full_call_id.as_u64())
        {
            pending.remove(idx);
        }
        Vec::new()
    }

    /// Drops a call that will never get a response: its originating
    /// connection disconnected. Running calls stay registered with the
    /// node manager (the node must still finish and release capacity) but
    /// their eventual completion is discarded rather than delivered.
    pub fn discard_func_call(&self, full_call_id: FullCallId) {
        let mut running = self.running.lock().unwrap();
        if let Some(mut state) = running.remove(&full_call_id.as_u64()) {
            if let Some(tx) = state.response_tx.take() {
                let _ = tx.send(FuncCallOutcome::Discarded);
            }
            self.discarded.lock().unwrap().insert(full_call_id.as_u64());
            return;
        }
        drop(running);

        let mut pending = self.pending.lock().unwrap();
        let idx = pending
            .iter()
            .position(|s| s.func_call.full_call_id().as_u64() == full_call_id.as_u64());
        if let Some(idx) = idx {
            if let Some(mut state) = pending.remove(idx) {
                if let Some(tx) = state.response_tx.take() {
                    let _ = tx.send(FuncCallOutcome::Discarded);
                }
            }
        } else {
            self.discarded.lock().unwrap().insert(full_call_id.as_u64());
        }
    }

    /// Discards every call (pending or running) originating from a
    /// connection that just disconnected.
    pub fn discard_func_calls_for_connection(&self, connection_id: ConnectionId) {
        let running_ids: Vec<u64> = self
            .running
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.connection_id == Some(connection_id))
            .map(|(id, _)| *id)
            .collect();
        let pending_ids: Vec<u64> = self
            .pending
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.connection_id == Some(connection_id))
            .map(|s| s.func_call.full_call_id().as_u64())
            .collect();
        for id in running_ids.into_iter().chain(pending_ids) {
            self.discard_func_call(FullCallId(id));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }
}
