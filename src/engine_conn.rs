//! Wires an accepted gateway↔engine TCP connection into the engine's
//! per-connection read/execute/write loop: one task per connection, run on
//! the owning [`crate::io_worker::IoWorker`]'s `LocalSet`, decoding
//! `FUNC_CALL` frames and handing each off to [`crate::engine::handle_func_call`].
//!
//! Grounded on `original_source/src/engine/io_worker.h`'s per-connection
//! task pattern; the accept loop itself mirrors the teacher's
//! `cluster.rs::start_health_server` listener idiom (bind, loop, accept).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionType};
use crate::engine::{handle_func_call, CallContextTable, FuncCallExecutor};
use crate::io_worker::IoWorkerHandle;
use crate::protocol::{GatewayMessage, GATEWAY_MESSAGE_SIZE};

/// Accepts connections on `addr` and transfers each one to `worker`.
/// Runs on the caller's own runtime, not the worker's `LocalSet` — the
/// transfer happens over `worker`'s event channel either way.
pub async fn accept_loop(addr: SocketAddr, worker: IoWorkerHandle) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind engine connection listener");
            return;
        }
    };
    info!(%addr, "engine connection listener started");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                info!(%peer, "accepted gateway connection");
                worker.transfer_connection(ConnectionHandle::new(ConnectionType::GatewayEngineLink, stream));
            }
            Err(e) => error!(error = %e, "accept failed"),
        }
    }
}

/// `NewConnectionFn` callback: spawns the read/execute/write loop for one
/// just-registered connection onto the worker's `LocalSet`.
pub fn spawn_handler(
    _id: ConnectionId,
    mut conn: ConnectionHandle,
    _worker: IoWorkerHandle,
    contexts: Arc<CallContextTable>,
    executor: Arc<dyn FuncCallExecutor>,
) {
    tokio::task::spawn_local(async move {
        loop {
            let mut header_buf = [0u8; GATEWAY_MESSAGE_SIZE];
            if conn.stream.read_exact(&mut header_buf).await.is_err() {
                return;
            }
            let Some(header) = GatewayMessage::decode(&header_buf[..]) else {
                return;
            };

            let mut payload = vec![0u8; header.payload_size as usize];
            if !payload.is_empty() && conn.stream.read_exact(&mut payload).await.is_err() {
                return;
            }

            let (response, response_payload) = handle_func_call(&contexts, executor.as_ref(), header, payload);
            if conn.stream.write_all(&response.encode()).await.is_err() {
                return;
            }
            if !response_payload.is_empty() && conn.stream.write_all(&response_payload).await.is_err() {
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EchoExecutor;
    use crate::io_worker::{IoWorker, NewConnectionFn};
    use crate::protocol::GatewayMessageType;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn spawn_handler_echoes_a_func_call_over_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let contexts = Arc::new(CallContextTable::new());
        let executor: Arc<dyn FuncCallExecutor> = Arc::new(EchoExecutor);
        let on_new_connection: NewConnectionFn = {
            let contexts = contexts.clone();
            let executor = executor.clone();
            Arc::new(move |id, conn, worker| {
                spawn_handler(id, conn, worker, contexts.clone(), executor.clone());
            })
        };
        let mut worker = IoWorker::start("test-engine-conn", 4096, on_new_connection);

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        worker
            .handle()
            .transfer_connection(ConnectionHandle::new(ConnectionType::GatewayEngineLink, server_stream));

        let header = GatewayMessage {
            message_type: GatewayMessageType::FuncCall as u16,
            func_id: 1,
            method_id: 0,
            client_id: 1,
            call_id: 0,
            payload_size: 5,
            processing_time_us: 0,
            dispatch_delay_us: 0,
        };
        client.write_all(&header.encode()).await.unwrap();
        client.write_all(b"hello").await.unwrap();

        let mut resp_header = [0u8; GATEWAY_MESSAGE_SIZE];
        client.read_exact(&mut resp_header).await.unwrap();
        let decoded = GatewayMessage::decode(&resp_header[..]).unwrap();
        assert_eq!(decoded.message_type(), Some(GatewayMessageType::FuncCallComplete));

        let mut resp_payload = vec![0u8; decoded.payload_size as usize];
        client.read_exact(&mut resp_payload).await.unwrap();
        assert_eq!(resp_payload, b"hello");

        worker.schedule_stop();
        worker.wait_for_finish();
    }
}
