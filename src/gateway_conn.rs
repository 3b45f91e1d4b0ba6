//! The gateway's outbound half of an engine connection: sends `FUNC_CALL`
//! frames for calls [`crate::gateway::Gateway`] has dispatched, and feeds
//! `FUNC_CALL_COMPLETE`/`FUNC_CALL_FAILED` replies back into
//! [`crate::gateway::Gateway::finish_func_call`].
//!
//! Grounded on `original_source/src/gateway/server.h`'s per-engine-node
//! outbound connection. Which node lives at which address is sourced from
//! the coordination service (kept opaque per `DESIGN.md` decision 4), so
//! this module only models the connection once an address is known;
//! `main.rs` dials a fixed set of configured engine addresses at startup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::error;

use crate::gateway::{DispatchedCall, FuncCallOutcome, Gateway};
use crate::ids::{FuncCall, NodeId};
use crate::protocol::{GatewayMessage, GatewayMessageType, GATEWAY_MESSAGE_SIZE};

fn now_us() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// One outbound connection to an engine node. The read half is driven by a
/// background task for the lifetime of the connection; `send` only touches
/// the write half, guarded by an async mutex since multiple calls may
/// dispatch to the same node concurrently.
pub struct EngineConnection {
    write_half: AsyncMutex<tokio::net::tcp::OwnedWriteHalf>,
}

impl EngineConnection {
    /// Connects to `addr` and spawns the task that reads replies back into
    /// `gateway` for the lifetime of the connection. `connections` is the
    /// registry the read loop uses to dispatch calls that the completion
    /// just freed capacity for, matching the way a node finishing a call
    /// immediately lets the next pending call take its place.
    pub async fn connect(
        node_id: NodeId,
        addr: &str,
        gateway: Arc<Gateway>,
        connections: Arc<EngineConnections>,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        tokio::spawn(read_loop(node_id, read_half, gateway, connections));
        Ok(EngineConnection {
            write_half: AsyncMutex::new(write_half),
        })
    }

    pub async fn send(&self, call: &DispatchedCall) -> std::io::Result<()> {
        let header = GatewayMessage {
            message_type: GatewayMessageType::FuncCall as u16,
            func_id: call.func_call.func_id,
            method_id: call.func_call.method_id,
            client_id: call.func_call.client_id,
            call_id: call.func_call.call_id,
            payload_size: call.payload.len() as u32,
            processing_time_us: 0,
            dispatch_delay_us: 0,
        };
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(&header.encode()).await?;
        if !call.payload.is_empty() {
            write_half.write_all(&call.payload).await?;
        }
        Ok(())
    }
}

async fn read_loop(
    node_id: NodeId,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    gateway: Arc<Gateway>,
    connections: Arc<EngineConnections>,
) {
    loop {
        let mut header_buf = [0u8; GATEWAY_MESSAGE_SIZE];
        if read_half.read_exact(&mut header_buf).await.is_err() {
            return;
        }
        let Some(header) = GatewayMessage::decode(&header_buf[..]) else {
            return;
        };

        let mut payload = vec![0u8; header.payload_size as usize];
        if !payload.is_empty() && read_half.read_exact(&mut payload).await.is_err() {
            return;
        }

        let outcome = match header.message_type() {
            Some(GatewayMessageType::FuncCallComplete) => FuncCallOutcome::Completed(payload),
            Some(GatewayMessageType::FuncCallFailed) => FuncCallOutcome::Failed,
            _ => {
                error!(?header, "unexpected message type on engine connection");
                continue;
            }
        };
        let full_call_id = FuncCall {
            func_id: header.func_id,
            method_id: header.method_id,
            client_id: header.client_id,
            call_id: header.call_id,
        }
        .full_call_id();
        gateway.finish_func_call(node_id, full_call_id, outcome, now_us());

        let freed = gateway.try_dispatch_pending(now_us());
        for call in freed {
            connections.dispatch(call).await;
        }
    }
}

/// One outbound connection per known engine node.
#[derive(Default)]
pub struct EngineConnections {
    by_node: std::sync::Mutex<HashMap<NodeId, Arc<EngineConnection>>>,
}

impl EngineConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node_id: NodeId, conn: Arc<EngineConnection>) {
        self.by_node.lock().unwrap().insert(node_id, conn);
    }

    /// Sends a dispatched call on the connection belonging to its node.
    /// Logs and drops the call if that node has no registered connection;
    /// the caller (gateway) will only discover the failure via the
    /// dispatch timeout, matching a real engine-connection drop.
    pub async fn dispatch(&self, call: DispatchedCall) {
        let conn = self.by_node.lock().unwrap().get(&call.node_id).cloned();
        match conn {
            Some(conn) => {
                if let Err(e) = conn.send(&call).await {
                    error!(error = %e, node_id = call.node_id, "failed to send func call to engine");
                }
            }
            None => error!(node_id = call.node_id, "no connection registered for engine node"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CallContextTable, EchoExecutor, FuncCallExecutor};
    use crate::engine_conn;
    use crate::func_config::FuncConfig;
    use crate::gateway_stats::GatewayStats;
    use crate::io_worker::{IoWorker, NewConnectionFn};
    use crate::node_manager::NodeManager;

    #[tokio::test]
    async fn dispatched_call_round_trips_through_a_real_engine_connection() {
        let func_config = Arc::new(FuncConfig::for_testing());
        let node_manager = Arc::new(NodeManager::new());
        node_manager.register_node(1, 1);
        let gateway = Arc::new(Gateway::new(func_config, node_manager, Arc::new(GatewayStats::new()), 16));

        let contexts = Arc::new(CallContextTable::new());
        let executor: Arc<dyn FuncCallExecutor> = Arc::new(EchoExecutor);
        let on_new_connection: NewConnectionFn = {
            let contexts = contexts.clone();
            let executor = executor.clone();
            Arc::new(move |id, conn, worker| {
                engine_conn::spawn_handler(id, conn, worker, contexts.clone(), executor.clone());
            })
        };
        let mut worker = IoWorker::start("test-gateway-conn", 4096, on_new_connection);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_task = tokio::spawn({
            let handle = worker.handle();
            async move {
                let (stream, _) = listener.accept().await.unwrap();
                handle.transfer_connection(crate::connection::ConnectionHandle::new(
                    crate::connection::ConnectionType::GatewayEngineLink,
                    stream,
                ));
            }
        });

        let connections = Arc::new(EngineConnections::new());
        let conn = EngineConnection::connect(1, &addr.to_string(), gateway.clone(), connections.clone())
            .await
            .unwrap();
        accept_task.await.unwrap();
        connections.insert(1, Arc::new(conn));

        let (rx, dispatched, _) = gateway
            .new_func_call("echo", "Invoke", 1, None, b"round-trip".to_vec(), 0)
            .unwrap();
        connections.dispatch(dispatched.unwrap()).await;

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), rx).await.unwrap().unwrap();
        assert!(matches!(outcome, FuncCallOutcome::Completed(ref p) if p == b"round-trip"));

        worker.schedule_stop();
        worker.wait_for_finish();
    }
}
