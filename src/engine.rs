//! Engine-side bookkeeping for calls dispatched by the gateway: the
//! per-call context table correlating a `FUNC_CALL` with whatever
//! shared-log append/read it goes on to issue.
//!
//! Function execution itself is out of scope — no worker runtime is
//! implemented here. `FuncCallExecutor` models the boundary a real runtime
//! would fill; the stub shipped here completes every call by echoing its
//! payload back, matching the "Simple dispatch" scenario this crate is
//! tested against.
//!
//! Grounded on `original_source`'s `EngineBase` per-call context table
//! (`fn_call_ctx_`, keyed by `full_call_id`) referenced in the supplemented
//! behavior notes, and `original_source/src/gateway/server.h`'s
//! `FUNC_CALL`/`FUNC_CALL_COMPLETE`/`FUNC_CALL_FAILED` message types.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::ids::{FullCallId, FuncCall};
use crate::protocol::{GatewayMessage, GatewayMessageType};

/// Bookkeeping an engine keeps for a call it's currently running, so a
/// later shared-log append/read issued on that call's behalf can be
/// attributed back to it.
#[derive(Debug, Clone)]
pub struct FuncCallContext {
    pub full_call_id: FullCallId,
    pub user_logspace: u32,
    pub metalog_progress: u64,
    pub parent_call_id: Option<FullCallId>,
}

/// Maps `full_call_id` to its running context, mirroring `EngineBase`'s
/// `fn_call_ctx_` table.
#[derive(Default)]
pub struct CallContextTable {
    by_full_call_id: Mutex<HashMap<u64, FuncCallContext>>,
}

impl CallContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, full_call_id: FullCallId, parent_call_id: Option<FullCallId>) {
        self.by_full_call_id.lock().unwrap().insert(
            full_call_id.as_u64(),
            FuncCallContext {
                full_call_id,
                user_logspace: 0,
                metalog_progress: 0,
                parent_call_id,
            },
        );
    }

    pub fn advance_metalog(&self, full_call_id: FullCallId, position: u64) {
        if let Some(ctx) = self.by_full_call_id.lock().unwrap().get_mut(&full_call_id.as_u64()) {
            ctx.metalog_progress = ctx.metalog_progress.max(position);
        }
    }

    pub fn finish(&self, full_call_id: FullCallId) -> Option<FuncCallContext> {
        self.by_full_call_id.lock().unwrap().remove(&full_call_id.as_u64())
    }

    pub fn get(&self, full_call_id: FullCallId) -> Option<FuncCallContext> {
        self.by_full_call_id.lock().unwrap().get(&full_call_id.as_u64()).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_full_call_id.lock().unwrap().len()
    }
}

/// Executes a function call's body and returns its output. Not implemented
/// by this crate (no function-execution runtime is in scope); callers
/// provide one, e.g. `EchoExecutor` for tests and the single-binary
/// deployment described in the spec's simple-dispatch scenario.
pub trait FuncCallExecutor: Send + Sync {
    fn execute(&self, func_call: FuncCall, payload: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// Returns the input unchanged. Stands in for a real worker runtime until
/// one is built; sufficient for the scenario where the gateway routes a
/// call through an engine and expects its payload back unmodified.
pub struct EchoExecutor;

impl FuncCallExecutor for EchoExecutor {
    fn execute(&self, _func_call: FuncCall, payload: Vec<u8>) -> Result<Vec<u8>, String> {
        Ok(payload)
    }
}

/// Handles one `FUNC_CALL` message: runs it through the executor, tracks
/// its context for the duration, and returns the completion or failure
/// header plus payload to send back to the gateway.
pub fn handle_func_call(
    contexts: &CallContextTable,
    executor: &dyn FuncCallExecutor,
    header: GatewayMessage,
    payload: Vec<u8>,
) -> (GatewayMessage, Vec<u8>) {
    let func_call = FuncCall {
        func_id: header.func_id,
        method_id: header.method_id,
        client_id: header.client_id,
        call_id: header.call_id,
    };
    let full_call_id = func_call.full_call_id();
    contexts.start(full_call_id, None);

    let result = executor.execute(func_call, payload);
    contexts.finish(full_call_id);

    match result {
        Ok(output) => (
            GatewayMessage {
                message_type: GatewayMessageType::FuncCallComplete as u16,
                func_id: header.func_id,
                method_id: header.method_id,
                client_id: header.client_id,
                call_id: header.call_id,
                payload_size: output.len() as u32,
                processing_time_us: 0,
                dispatch_delay_us: 0,
            },
            output,
        ),
        Err(_) => (
            GatewayMessage {
                message_type: GatewayMessageType::FuncCallFailed as u16,
                func_id: header.func_id,
                method_id: header.method_id,
                client_id: header.client_id,
                call_id: header.call_id,
                payload_size: 0,
                processing_time_us: 0,
                dispatch_delay_us: 0,
            },
            Vec::new(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_header(call_id: u32, payload_size: u32) -> GatewayMessage {
        GatewayMessage {
            message_type: GatewayMessageType::FuncCall as u16,
            func_id: 7,
            method_id: 0,
            client_id: 1,
            call_id,
            payload_size,
            processing_time_us: 0,
            dispatch_delay_us: 0,
        }
    }

    #[test]
    fn echo_executor_completes_with_the_same_payload() {
        let contexts = CallContextTable::new();
        let (response, payload) = handle_func_call(&contexts, &EchoExecutor, call_header(0, 5), b"hello".to_vec());
        assert_eq!(response.message_type(), Some(GatewayMessageType::FuncCallComplete));
        assert_eq!(payload, b"hello");
        assert_eq!(contexts.len(), 0, "context must be cleared once the call finishes");
    }

    struct FailingExecutor;
    impl FuncCallExecutor for FailingExecutor {
        fn execute(&self, _func_call: FuncCall, _payload: Vec<u8>) -> Result<Vec<u8>, String> {
            Err("boom".to_string())
        }
    }

    #[test]
    fn failing_executor_reports_func_call_failed() {
        let contexts = CallContextTable::new();
        let (response, payload) = handle_func_call(&contexts, &FailingExecutor, call_header(1, 3), b"abc".to_vec());
        assert_eq!(response.message_type(), Some(GatewayMessageType::FuncCallFailed));
        assert!(payload.is_empty());
    }

    #[test]
    fn context_table_tracks_metalog_progress_while_running() {
        let contexts = CallContextTable::new();
        let full_call_id = FuncCall {
            func_id: 7,
            method_id: 0,
            client_id: 1,
            call_id: 0,
        }
        .full_call_id();
        contexts.start(full_call_id, None);
        contexts.advance_metalog(full_call_id, 10);
        assert_eq!(contexts.get(full_call_id).unwrap().metalog_progress, 10);
        contexts.finish(full_call_id);
        assert!(contexts.get(full_call_id).is_none());
    }
}
