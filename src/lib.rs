//! Library surface for the binary in `main.rs` and for the integration
//! tests under `tests/`, which exercise the gateway/storage/engine
//! assembly the way `main.rs`'s role dispatch does.

pub mod config;
pub mod connection;
pub mod engine;
pub mod engine_conn;
pub mod errors;
pub mod func_config;
pub mod gateway;
pub mod gateway_conn;
pub mod gateway_stats;
pub mod grpc_surface;
pub mod http_surface;
pub mod ids;
pub mod io_worker;
pub mod kv_backend;
pub mod log_storage;
pub mod log_types;
pub mod node_manager;
pub mod pb;
pub mod protocol;
pub mod sequencer_link;
pub mod storage_collection;
pub mod storage_conn;
pub mod storage_node;
pub mod view;
