use std::sync::Arc;

use mimalloc::MiMalloc;
use tracing::{error, info};

use rust_faas::config::{Config, Role, StorageBackend};
use rust_faas::engine::{CallContextTable, EchoExecutor, FuncCallExecutor};
use rust_faas::engine_conn;
use rust_faas::func_config::FuncConfig;
use rust_faas::gateway::Gateway;
use rust_faas::gateway_conn::{EngineConnection, EngineConnections};
use rust_faas::gateway_stats::GatewayStats;
use rust_faas::grpc_surface;
use rust_faas::http_surface;
use rust_faas::io_worker;
use rust_faas::kv_backend::{KvBackend, RocksDbBackend, SledBackend};
use rust_faas::node_manager::NodeManager;
use rust_faas::sequencer_link::LoopbackSequencerLink;
use rust_faas::storage_collection::StorageCollection;
use rust_faas::storage_conn;
use rust_faas::storage_node::StorageNode;
use rust_faas::view::ViewWatcherHandle;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = match config.role {
        Role::Gateway => run_gateway(config).await,
        Role::Engine => run_engine(config).await,
        Role::Storage => run_storage(config).await,
        Role::SequencerLink => run_sequencer_link(config).await,
    };
    std::process::exit(exit_code);
}

async fn run_gateway(config: Config) -> i32 {
    let func_config = match FuncConfig::load(&config.func_config_file) {
        Ok(fc) => Arc::new(fc),
        Err(e) => {
            error!(error = %e, path = %config.func_config_file, "failed to load function config");
            return 1;
        }
    };

    let node_manager = Arc::new(NodeManager::new());
    let stats = Arc::new(GatewayStats::new());
    let gateway = Arc::new(Gateway::new(func_config, node_manager.clone(), stats, config.max_pending_func_calls));

    let connections = Arc::new(EngineConnections::new());
    for (idx, entry) in config.engine_addrs.iter().enumerate() {
        let (node_id, addr) = match entry.split_once('@') {
            Some((id, addr)) => match id.parse() {
                Ok(id) => (id, addr),
                Err(e) => {
                    error!(error = %e, entry = %entry, "invalid engine node id in FAAS_ENGINE_ADDRS");
                    return 1;
                }
            },
            None => (idx as u16 + 1, entry.as_str()),
        };
        node_manager.register_node(node_id, config.message_conn_per_worker as u32);
        match EngineConnection::connect(node_id, addr, gateway.clone(), connections.clone()).await {
            Ok(conn) => connections.insert(node_id, Arc::new(conn)),
            Err(e) => {
                error!(error = %e, node_id, addr, "failed to connect to engine node");
                return 1;
            }
        }
    }

    let http_addr = format!("{}:{}", config.listen_addr, config.http_port).parse().unwrap();
    let grpc_addr = format!("{}:{}", config.listen_addr, config.grpc_port).parse().unwrap();

    info!(role = "gateway", http_addr = %http_addr, grpc_addr = %grpc_addr, engines = config.engine_addrs.len(), "starting");

    let http_task = tokio::spawn(http_surface::serve(http_addr, gateway.clone(), connections.clone()));
    let grpc_task = tokio::spawn(grpc_surface::serve(grpc_addr, gateway, connections));

    wait_for_shutdown_signal().await;
    http_task.abort();
    grpc_task.abort();
    0
}

async fn run_storage(config: Config) -> i32 {
    let backend: Arc<dyn KvBackend> = match config.storage_backend {
        StorageBackend::RocksDb => {
            match RocksDbBackend::open(
                &config.storage_datadir,
                config.rocksdb_max_background_jobs,
                config.rocksdb_enable_compression,
            ) {
                Ok(backend) => Arc::new(backend),
                Err(e) => {
                    error!(error = %e, "failed to open rocksdb backend");
                    return 1;
                }
            }
        }
        StorageBackend::Sled => match SledBackend::open(&config.storage_datadir) {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                error!(error = %e, "failed to open sled backend");
                return 1;
            }
        },
    };

    let collection = Arc::new(StorageCollection::new());
    let (_view_handle, view_watcher) = ViewWatcherHandle::new();
    let sequencer_link = Arc::new(LoopbackSequencerLink::new());
    let node = Arc::new(StorageNode::new(1, collection, backend, view_watcher, sequencer_link));

    let on_new_connection: io_worker::NewConnectionFn = {
        let node = node.clone();
        Arc::new(move |id, conn, worker| {
            storage_conn::spawn_handler(id, conn, worker, node.clone());
        })
    };
    let mut worker = io_worker::IoWorker::start("storage-io-0".to_string(), 64 * 1024, on_new_connection);

    let listen_addr = format!("{}:{}", config.listen_addr, config.storage_conn_port);
    let addr = match listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, %listen_addr, "invalid storage connection listen address");
            return 1;
        }
    };
    let accept_task = tokio::spawn(storage_conn::accept_loop(addr, worker.handle()));

    info!(role = "storage", %addr, datadir = %config.storage_datadir, "starting");
    let reporter = tokio::spawn(node.clone().run_shard_progress_reporter());

    wait_for_shutdown_signal().await;
    accept_task.abort();
    reporter.abort();
    worker.schedule_stop();
    worker.wait_for_finish();
    0
}

async fn run_engine(config: Config) -> i32 {
    // Function-execution runtime is out of scope: `EchoExecutor` stands in
    // for whatever a real worker would run, but the call-dispatch path
    // (accept a gateway connection, decode FUNC_CALL, track it in the
    // context table, reply) is fully wired.
    let contexts = Arc::new(CallContextTable::new());
    let executor: Arc<dyn FuncCallExecutor> = Arc::new(EchoExecutor);
    let on_new_connection: io_worker::NewConnectionFn = {
        let contexts = contexts.clone();
        let executor = executor.clone();
        Arc::new(move |id, conn, worker| {
            engine_conn::spawn_handler(id, conn, worker, contexts.clone(), executor.clone());
        })
    };
    let mut worker = io_worker::IoWorker::start("engine-io-0".to_string(), 64 * 1024, on_new_connection);

    let listen_addr = format!("{}:{}", config.listen_addr, config.engine_conn_port);
    let addr = match listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, %listen_addr, "invalid engine connection listen address");
            return 1;
        }
    };
    let accept_task = tokio::spawn(engine_conn::accept_loop(addr, worker.handle()));

    info!(role = "engine", %addr, num_io_workers = config.num_io_workers, "starting");
    wait_for_shutdown_signal().await;
    accept_task.abort();
    worker.schedule_stop();
    worker.wait_for_finish();
    0
}

async fn run_sequencer_link(_config: Config) -> i32 {
    // The sequencer's own consensus/FSM is out of scope; this role only
    // exists so the single binary can be launched under that name without
    // erroring, matching the push-only boundary `SequencerLink` models.
    info!(role = "sequencer-link", "starting (no-op: sequencer consensus is out of scope)");
    wait_for_shutdown_signal().await;
    0
}

async fn wait_for_shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
}
