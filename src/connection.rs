//! The `ConnectionBase` abstraction: a handle to one accepted socket, tagged
//! with a type so an IO worker can look connections up by role (engine link,
//! gateway link, storage peer, ...) and pick one for outbound dispatch.
//!
//! Grounded on `original_source/src/engine/io_worker.h`'s `ConnectionBase`.
//! The original transfers ownership between threads by writing a raw
//! `shared_ptr` through a pipe (`pipe_write_buf_for_transfer_`); here that
//! same transfer is a [`ConnectionHandle`] moved through a bounded
//! `tokio::sync::mpsc` channel, so the type system enforces single
//! ownership instead of a manual buffer convention.

use std::fmt;

use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    GatewayEngineLink,
    EngineStoragePeer,
    SequencerLink,
    HttpClient,
}

/// A connection id, unique among connections of the same type held by one
/// IO worker. Assigned by the worker when the connection is accepted, not
/// by the connection itself.
pub type ConnectionId = i32;

/// An accepted socket plus the bookkeeping an `IoWorker` needs to route and
/// reclaim it. Ownership moves by value: once sent down the acceptor→worker
/// channel, the sender can no longer touch the socket.
pub struct ConnectionHandle {
    pub conn_type: ConnectionType,
    pub id: ConnectionId,
    pub stream: TcpStream,
}

impl ConnectionHandle {
    pub fn new(conn_type: ConnectionType, stream: TcpStream) -> Self {
        ConnectionHandle {
            conn_type,
            id: -1,
            stream,
        }
    }

    pub fn set_id(&mut self, id: ConnectionId) {
        self.id = id;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("conn_type", &self.conn_type)
            .field("id", &self.id)
            .finish()
    }
}
