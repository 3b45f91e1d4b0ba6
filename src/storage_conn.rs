//! Wires an accepted engine/sequencer↔storage TCP connection into the
//! storage node's read/dispatch/write loop: one task per connection, run on
//! the owning [`crate::io_worker::IoWorker`]'s `LocalSet`, decoding
//! `REPLICATE`/`READ_AT`/`METALOGS` frames and handing each off to
//! [`crate::storage_node::StorageNode`].
//!
//! Grounded on `engine_conn.rs`'s `accept_loop`/`spawn_handler` pattern,
//! adapted from `GatewayMessage` to `SharedLogMessage` framing; the metalog
//! payload decode follows `sequencer_link.rs`'s `ToSequencer::from_proto`
//! precedent for turning a wire payload into a generated protobuf type.

use std::net::SocketAddr;
use std::sync::Arc;

use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionType};
use crate::errors::CoreError;
use crate::io_worker::IoWorkerHandle;
use crate::pb::faas::MetaLogsProto;
use crate::protocol::{SharedLogMessage, SharedLogOpType, SHARED_LOG_MESSAGE_SIZE};
use crate::storage_node::StorageNode;

/// Accepts connections on `addr` and transfers each one to `worker`, tagged
/// as a storage peer link.
pub async fn accept_loop(addr: SocketAddr, worker: IoWorkerHandle) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind storage connection listener");
            return;
        }
    };
    info!(%addr, "storage connection listener started");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                info!(%peer, "accepted storage peer connection");
                worker.transfer_connection(ConnectionHandle::new(ConnectionType::EngineStoragePeer, stream));
            }
            Err(e) => error!(error = %e, "accept failed"),
        }
    }
}

/// `NewConnectionFn` callback: spawns the read/dispatch/write loop for one
/// just-registered connection onto the worker's `LocalSet`.
pub fn spawn_handler(_id: ConnectionId, mut conn: ConnectionHandle, _worker: IoWorkerHandle, node: Arc<StorageNode>) {
    tokio::task::spawn_local(async move {
        loop {
            let mut header_buf = [0u8; SHARED_LOG_MESSAGE_SIZE];
            if conn.stream.read_exact(&mut header_buf).await.is_err() {
                return;
            }
            let Some(message) = SharedLogMessage::decode(&header_buf[..]) else {
                return;
            };

            let mut payload = vec![0u8; message.payload_size as usize];
            if !payload.is_empty() && conn.stream.read_exact(&mut payload).await.is_err() {
                return;
            }

            let response = match message.op_type() {
                Some(SharedLogOpType::Replicate) => {
                    match node.handle_replicate(message, payload) {
                        Ok(()) => None,
                        Err(e) => {
                            if !report_or_abort(e) {
                                return;
                            }
                            None
                        }
                    }
                }
                Some(SharedLogOpType::ReadAt) => node.handle_read_at(message),
                Some(SharedLogOpType::Metalogs) => match MetaLogsProto::decode(payload.as_slice()) {
                    Ok(batch) => {
                        let mut disconnect = false;
                        for metalog in &batch.metalogs {
                            if let Err(e) = node.provide_metalog(metalog.logspace_id, &metalog.seqnums, metalog.metalog_position) {
                                if !report_or_abort(e) {
                                    disconnect = true;
                                    break;
                                }
                            }
                        }
                        if disconnect {
                            return;
                        }
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed metalogs payload");
                        None
                    }
                },
                _ => {
                    warn!(op_type = message.op_type, "unexpected op_type on storage connection");
                    None
                }
            };

            if let Some((response_header, response_payload)) = response {
                if conn.stream.write_all(&response_header.encode()).await.is_err() {
                    return;
                }
                if !response_payload.is_empty() && conn.stream.write_all(&response_payload).await.is_err() {
                    return;
                }
            }
        }
    });
}

/// Logs and keeps the connection alive for an [`CoreError::Input`], tears it
/// down for a [`CoreError::Transient`], and aborts the process for a
/// [`CoreError::Fatal`] — the one call site where a durability invariant
/// violation reaches the network boundary and must stop the node rather
/// than propagate. Returns whether the connection should stay open.
fn report_or_abort(err: CoreError) -> bool {
    match err {
        CoreError::Input(e) => {
            warn!(error = %e, "rejected storage request");
            true
        }
        CoreError::Transient(e) => {
            warn!(error = %e, "closing storage connection");
            false
        }
        CoreError::Fatal(e) => e.abort(),
    }
}
