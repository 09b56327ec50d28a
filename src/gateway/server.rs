//! # HTTP Server Module
//!
//! The HTTP front of the gateway. Every request goes to a single fallback
//! handler which matches it against the route table, translates it into an
//! invocation event, dispatches it and translates the result back.
//!
//! The server owns only the listener lifecycle. Sandboxes are torn down on
//! every exit path of [`GatewayServer::serve`].
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` for sharing the route table and pools across request tasks
//! - Axum's `State` extractor to hand the `GatewayContext` to the handler
//! - `tokio::sync::watch` to start the shutdown deadline once the signal fires
//! - Tower layers for request tracing and CORS

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::CONTENT_LENGTH, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json, Router as AxumRouter,
};
use http_body_util::LengthLimitError;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::core::config::ServerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::invocation::dispatcher::Dispatcher;
use crate::invocation::event::{build_event, InboundRequest, RequestMeta};
use crate::invocation::response::into_response;
use crate::invocation::sandbox::SandboxPool;
use crate::observability::metrics;
use crate::routing::router::RouteTable;

/// Response header carrying the request id, as the cloud gateway sends it
pub const REQUEST_ID_HEADER: &str = "apigw-requestid";

/// Process-wide state shared by all request tasks
///
/// Built once at startup; several instances can coexist (tests).
#[derive(Debug, Clone)]
pub struct GatewayContext {
    pub route_table: Arc<RouteTable>,
    pub dispatcher: Dispatcher,
    pub stage: Arc<str>,
    pub max_body_size: usize,
}

impl GatewayContext {
    pub fn new(route_table: Arc<RouteTable>, pools: Arc<SandboxPool>, config: &ServerConfig) -> Self {
        Self {
            route_table,
            dispatcher: Dispatcher::new(pools),
            stage: Arc::from(config.stage.as_str()),
            max_body_size: config.max_body_size,
        }
    }

    pub fn pools(&self) -> &Arc<SandboxPool> {
        self.dispatcher.pools()
    }
}

/// Build the axum application: one fallback handler plus tracing and CORS
pub fn build_app(context: GatewayContext, cors: bool) -> AxumRouter {
    let app = AxumRouter::new()
        .fallback(handle_request)
        .with_state(context)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Main request handler that processes all incoming requests
async fn handle_request(State(context): State<GatewayContext>, request: Request) -> Response {
    let meta = RequestMeta::new();
    let (parts, body) = request.into_parts();

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let route = match context.route_table.match_route(&parts.method, parts.uri.path()) {
        Ok(route) => route,
        Err(e) => {
            debug!(method = %parts.method, path = %parts.uri.path(), "No matching route");
            return finish(e.into_response(), &meta);
        }
    };

    let declared_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(size) = declared_length.filter(|size| *size > context.max_body_size) {
        return finish(too_large(size, context.max_body_size), &meta);
    }

    let body = match axum::body::to_bytes(body, context.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) if exceeds_limit(&e) => {
            return finish(too_large(context.max_body_size + 1, context.max_body_size), &meta);
        }
        Err(e) => {
            warn!(request_id = %meta.request_id, error = %e, "Failed to read request body");
            let response = (StatusCode::BAD_REQUEST, Json(json!({ "message": "Bad Request" })));
            return finish(response.into_response(), &meta);
        }
    };

    let inbound = InboundRequest {
        method: parts.method,
        uri: parts.uri,
        version: parts.version,
        headers: parts.headers,
        body,
        peer,
    };

    let event = build_event(&inbound, &route, &meta, &context.stage);
    debug!(
        request_id = %meta.request_id,
        function = %route.function.name,
        route_key = %route.route_key,
        "Dispatching request"
    );

    let result = context.dispatcher.dispatch(&route, &event).await;
    finish(into_response(result, &route.function.name), &meta)
}

/// Whether reading the body failed because it outgrew `max_body_size`
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn too_large(size: usize, limit: usize) -> Response {
    GatewayError::PayloadTooLarge { size, limit }.into_response()
}

fn finish(mut response: Response, meta: &RequestMeta) -> Response {
    if let Ok(value) = HeaderValue::from_str(&meta.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    metrics::request_completed(response.status().as_u16());
    response
}

/// Startup banner lines: `METHOD http://addr/path -> function (handler)`
pub fn route_banner(routes: &RouteTable, addr: SocketAddr) -> Vec<String> {
    routes
        .routes()
        .iter()
        .map(|entry| {
            format!(
                "{} http://{}{} -> {} ({})",
                entry.binding.method,
                addr,
                entry.binding.path,
                entry.function.name,
                entry.function.handler
            )
        })
        .collect()
}

/// Bound, not yet serving, HTTP front
pub struct GatewayServer {
    context: GatewayContext,
    listener: TcpListener,
    cors: bool,
    shutdown_timeout: Duration,
    reap_interval: Duration,
}

impl GatewayServer {
    /// Bind the listener (port 0 picks a free port)
    pub async fn bind(
        context: GatewayContext,
        addr: SocketAddr,
        config: &ServerConfig,
        reap_interval: Duration,
    ) -> GatewayResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            GatewayError::config(format!("Failed to bind gateway server to {}: {}", addr, e))
        })?;

        Ok(Self {
            context,
            listener,
            cors: config.cors,
            shutdown_timeout: config.shutdown_timeout,
            reap_interval,
        })
    }

    pub fn local_addr(&self) -> GatewayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then tear every sandbox down
    pub async fn serve<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pools = Arc::clone(self.context.pools());
        let reaper_token = CancellationToken::new();
        let reaper = pools.spawn_reaper(self.reap_interval, reaper_token.clone());

        let (signal_tx, mut signal_rx) = tokio::sync::watch::channel(false);
        let signal = async move {
            shutdown.await;
            info!("Shutdown signal received, draining in-flight requests");
            let _ = signal_tx.send(true);
        };

        let grace = self.shutdown_timeout;
        let deadline = async move {
            let fired = signal_rx.wait_for(|fired| *fired).await.is_ok();
            if !fired {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(grace).await;
        };

        let app = build_app(self.context, self.cors);
        let server = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal);

        let result = tokio::select! {
            result = server => result.map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e))),
            _ = deadline => {
                warn!(timeout = ?grace, "Graceful shutdown timed out, abandoning in-flight requests");
                Ok(())
            }
        };

        reaper_token.cancel();
        let _ = reaper.await;
        pools.shutdown().await;

        result
    }
}
