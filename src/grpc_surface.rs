//! The gateway's gRPC entry point: a single `FunctionInvoker` service
//! multiplexing every configured function and method, since ahead-of-time
//! `tonic-build` codegen cannot emit one service per runtime-loaded
//! function name (see `DESIGN.md` decision 2).
//!
//! Grounded on the teacher's `grpc.rs` (`tonic::async_trait` service impl
//! pattern, `Server::builder().add_service(...).serve(addr)`) with the
//! Raft-transport and test-coordination RPC groups dropped, since those
//! belong to the load-generation domain this crate no longer implements.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{error, info};

use crate::gateway::{FuncCallOutcome, Gateway, GatewayError};
use crate::gateway_conn::EngineConnections;
use crate::pb::faas::function_invoker_server::{FunctionInvoker, FunctionInvokerServer};
use crate::pb::faas::{FunctionRequest, FunctionResponse};

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

fn now_us() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

pub struct FunctionInvokerService {
    gateway: Arc<Gateway>,
    connections: Arc<EngineConnections>,
}

impl FunctionInvokerService {
    pub fn new(gateway: Arc<Gateway>, connections: Arc<EngineConnections>) -> Self {
        FunctionInvokerService { gateway, connections }
    }
}

#[tonic::async_trait]
impl FunctionInvoker for FunctionInvokerService {
    async fn invoke(&self, request: Request<FunctionRequest>) -> Result<Response<FunctionResponse>, Status> {
        let req = request.into_inner();
        let (rx, dispatched, full_call_id) = self
            .gateway
            .new_func_call(&req.func_name, &req.method_name, 0, None, req.payload, now_us())
            .map_err(|e| match e {
                GatewayError::UnknownFunction(name) => Status::not_found(format!("unknown function: {name}")),
                GatewayError::UnknownMethod { func, method } => {
                    Status::not_found(format!("unknown method {method} for function {func}"))
                }
                GatewayError::ResourceExhausted(cap) => {
                    Status::resource_exhausted(format!("pending queue at capacity ({cap})"))
                }
            })?;
        if let Some(dispatched) = dispatched {
            self.connections.dispatch(dispatched).await;
        }

        match tokio::time::timeout(DISPATCH_TIMEOUT, rx).await {
            Ok(Ok(FuncCallOutcome::Completed(payload))) => Ok(Response::new(FunctionResponse { payload })),
            Ok(Ok(FuncCallOutcome::Failed)) => Err(Status::internal("function invocation failed")),
            Ok(Ok(FuncCallOutcome::Discarded)) => Err(Status::cancelled("call discarded")),
            Ok(Err(_)) => Err(Status::internal("dispatch channel closed")),
            Err(_) => {
                let freed = self.gateway.timeout_func_call(full_call_id, now_us());
                for call in freed {
                    self.connections.dispatch(call).await;
                }
                Err(Status::deadline_exceeded("dispatch timed out"))
            }
        }
    }
}

pub async fn serve(addr: SocketAddr, gateway: Arc<Gateway>, connections: Arc<EngineConnections>) {
    info!(addr = %addr, "gRPC function surface started");
    let service = FunctionInvokerServer::new(FunctionInvokerService::new(gateway, connections));
    if let Err(e) = Server::builder().add_service(service).serve(addr).await {
        error!(error = %e, "gRPC surface server error");
    }
}
