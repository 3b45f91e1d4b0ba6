//! The gateway's HTTP entry point: `POST /function/<func_name>` invokes the
//! default method of a configured function with the request body as
//! payload and returns the result body verbatim.
//!
//! Grounded on `spec.md` §6's HTTP surface and the teacher's
//! `cluster.rs::start_health_server`/`health_handler` for the `hyper`
//! server-construction idiom (`make_service_fn`/`service_fn`, one
//! `SocketAddr` bind per surface).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tracing::{error, info};

use crate::gateway::{FuncCallOutcome, Gateway, GatewayError};
use crate::gateway_conn::EngineConnections;

const DEFAULT_METHOD: &str = "Invoke";
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

fn now_us() -> i64 {
    // Monotonic wall-clock read at the call site; callers outside tests
    // always go through here rather than calling `SystemTime::now()`
    // themselves, so the single conversion point is easy to audit.
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

async fn handle(
    req: Request<Body>,
    gateway: Arc<Gateway>,
    connections: Arc<EngineConnections>,
) -> Result<Response<Body>, hyper::Error> {
    if req.method() != Method::POST {
        return Ok(not_found());
    }
    let path = req.uri().path().to_string();
    let func_name = match path.strip_prefix("/function/") {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Ok(not_found()),
    };

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b.to_vec(),
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return Ok(bad_gateway());
        }
    };

    let (rx, dispatched, full_call_id) = match gateway.new_func_call(&func_name, DEFAULT_METHOD, 0, None, body, now_us()) {
        Ok(result) => result,
        Err(GatewayError::UnknownFunction(_)) | Err(GatewayError::UnknownMethod { .. }) => return Ok(not_found()),
        Err(GatewayError::ResourceExhausted(_)) => return Ok(too_many_requests()),
    };
    if let Some(dispatched) = dispatched {
        connections.dispatch(dispatched).await;
    }

    match tokio::time::timeout(DISPATCH_TIMEOUT, rx).await {
        Ok(Ok(FuncCallOutcome::Completed(payload))) => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Body::from(payload))
            .unwrap()),
        Ok(Ok(FuncCallOutcome::Failed)) | Ok(Ok(FuncCallOutcome::Discarded)) => Ok(bad_gateway()),
        Ok(Err(_)) => Ok(bad_gateway()),
        Err(_) => {
            let freed = gateway.timeout_func_call(full_call_id, now_us());
            for call in freed {
                connections.dispatch(call).await;
            }
            Ok(Response::builder()
                .status(StatusCode::GATEWAY_TIMEOUT)
                .body(Body::from("dispatch timed out"))
                .unwrap())
        }
    }
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("not found"))
        .unwrap()
}

fn bad_gateway() -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Body::from("function invocation failed"))
        .unwrap()
}

fn too_many_requests() -> Response<Body> {
    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .body(Body::from("pending queue at capacity"))
        .unwrap()
}

pub async fn serve(addr: SocketAddr, gateway: Arc<Gateway>, connections: Arc<EngineConnections>) {
    let make_svc = make_service_fn(move |_conn| {
        let gateway = gateway.clone();
        let connections = connections.clone();
        async move { Ok::<_, hyper::Error>(service_fn(move |req| handle(req, gateway.clone(), connections.clone()))) }
    });

    info!(addr = %addr, "HTTP function surface started");
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        error!(error = %e, "HTTP surface server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func_config::FuncConfig;
    use crate::gateway_stats::GatewayStats;
    use crate::node_manager::NodeManager;

    fn gateway() -> Arc<Gateway> {
        let func_config = Arc::new(FuncConfig::for_testing());
        let node_manager = Arc::new(NodeManager::new());
        node_manager.register_node(1, 4);
        Arc::new(Gateway::new(func_config, node_manager, Arc::new(GatewayStats::new()), 16))
    }

    fn connections() -> Arc<EngineConnections> {
        Arc::new(EngineConnections::new())
    }

    #[tokio::test]
    async fn unknown_function_returns_404() {
        let gw = gateway();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/function/nope")
            .body(Body::empty())
            .unwrap();
        let response = handle(req, gw, connections()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_post_method_returns_404() {
        let gw = gateway();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/function/echo")
            .body(Body::empty())
            .unwrap();
        let response = handle(req, gw, connections()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dispatch_without_a_response_times_out_as_gateway_timeout() {
        let gw = gateway();
        // Dispatch succeeds (node 1 has capacity) but nothing ever resolves
        // the call's oneshot, so the handler must time out rather than hang
        // forever. Exercise the timeout path directly with a short timeout
        // instead of waiting the real 30s.
        let (rx, dispatched, full_call_id) = gw.new_func_call("echo", "Invoke", 0, None, vec![], 0).unwrap();
        assert!(dispatched.is_some());
        let result = tokio::time::timeout(Duration::from_millis(10), rx).await;
        assert!(result.is_err());

        // the handler's own timeout branch would now clean this up; confirm
        // the cleanup call itself releases the node and drops the entry.
        assert_eq!(gw.running_count(), 1);
        gw.timeout_func_call(full_call_id, 0);
        assert_eq!(gw.running_count(), 0);
    }

    #[tokio::test]
    async fn pending_queue_at_capacity_returns_429() {
        let func_config = Arc::new(FuncConfig::for_testing());
        let node_manager = Arc::new(NodeManager::new());
        node_manager.register_node(1, 1);
        let gw = Arc::new(Gateway::new(func_config, node_manager, Arc::new(GatewayStats::new()), 1));

        let (_first_rx, first, _) = gw.new_func_call("echo", "Invoke", 0, None, vec![], 0).unwrap();
        assert!(first.is_some());
        let (_second_rx, second, _) = gw.new_func_call("echo", "Invoke", 0, None, vec![], 0).unwrap();
        assert!(second.is_none());

        let req = Request::builder()
            .method(Method::POST)
            .uri("/function/echo")
            .body(Body::empty())
            .unwrap();
        let response = handle(req, gw, connections()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
