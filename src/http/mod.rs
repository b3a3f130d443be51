//! HTTP server for MCP over the SSE transport, plus the admin surface.
//!
//! A client opens `GET /sse`, receives an `endpoint` event naming the URL to
//! POST its messages to, and then every outbound message as a `message`
//! event. Closing the event stream ends the session.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::mcp::server::McpServer;
use crate::mcp::session::SessionId;
use crate::mcp::transport::{parse_message, Message, MessageChannel};

/// Path clients POST their messages to.
pub const MESSAGES_PATH: &str = "/messages/";

/// HTTP server state.
#[derive(Clone)]
pub struct HttpState {
    server: McpServer,
    routes: Arc<DashMap<SessionId, mpsc::Sender<Message>>>,
    metrics: Option<PrometheusHandle>,
}

impl HttpState {
    pub fn new(server: McpServer, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            server,
            routes: Arc::new(DashMap::new()),
            metrics,
        }
    }

    /// Sessions currently reachable over POST.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

/// Removes a session's inbound route when its event stream is dropped.
struct RouteGuard {
    routes: Arc<DashMap<SessionId, mpsc::Sender<Message>>>,
    id: SessionId,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        // Dropping the sender closes the session's inbound channel.
        self.routes.remove(&self.id);
        info!("SSE stream closed for session {}", self.id);
    }
}

/// Router with the SSE transport, health and admin routes.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/sse", get(open_stream))
        .route(MESSAGES_PATH, post(post_message))
        .route("/messages", post(post_message))
        .merge(admin_routes())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router with only the health and admin routes.
pub fn admin_router(state: HttpState) -> Router {
    admin_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn admin_routes() -> Router<HttpState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/admin/notify", post(notify))
        .route("/admin/sessions", get(list_sessions))
        .route("/metrics", get(render_metrics))
}

async fn serve(addr: &str, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::HttpServer(format!("cannot bind {}: {}", addr, e)))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Start the HTTP server.
pub async fn start_server(
    config: &Config,
    server: McpServer,
    metrics: Option<PrometheusHandle>,
) -> Result<()> {
    let app = router(HttpState::new(server, metrics));
    serve(&config.bind_addr(), app).await
}

/// Start the admin listener used alongside the stdio transport.
pub async fn start_admin_server(
    config: &Config,
    port: u16,
    server: McpServer,
    metrics: Option<PrometheusHandle>,
) -> Result<()> {
    let app = admin_router(HttpState::new(server, metrics));
    serve(&format!("{}:{}", config.host, port), app).await
}

/// Open a session and stream its outbound messages.
async fn open_stream(
    State(state): State<HttpState>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let options = state.server.options();
    let (channel, peer) = MessageChannel::pair(options.channel_capacity, options.send_timeout);
    let session = state.server.connect(channel).await?;
    let id = session.id().clone();

    state.routes.insert(id.clone(), peer.tx);
    let guard = RouteGuard {
        routes: state.routes.clone(),
        id: id.clone(),
    };
    info!("SSE stream opened for session {}", id);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?session_id={}", MESSAGES_PATH, id));

    let messages = ReceiverStream::new(peer.rx).filter_map(move |message| {
        let _guard = &guard;
        match message.to_json() {
            Ok(json) => Some(Ok(Event::default().event("message").data(json))),
            Err(e) => {
                warn!("Dropping unserializable message: {}", e);
                None
            }
        }
    });

    let stream = tokio_stream::once(Ok(endpoint)).chain(messages);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: Option<String>,
}

/// Deliver one inbound message to a session.
async fn post_message(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "session_id is required").into_response();
    };
    let id = SessionId::from(session_id);

    // Clone out of the map so no shard lock is held across the await.
    let Some(tx) = state.routes.get(&id).map(|route| route.value().clone()) else {
        debug!("POST for unknown session {}", id);
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };

    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!("Unparsable message for session {}: {}", id, e);
            return (StatusCode::BAD_REQUEST, "Could not parse message").into_response();
        }
    };

    match tx.send(message).await {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(_) => (StatusCode::GONE, "Session is closing").into_response(),
    }
}

/// Health check endpoint.
async fn health_check(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "live_sessions": state.server.sessions().live_count().await,
    }))
}

/// Tell every live session the catalog changed.
async fn notify(State(state): State<HttpState>) -> impl IntoResponse {
    let report = state.server.broadcaster().broadcast_catalog_changed().await;
    Json(serde_json::json!({
        "status": "ok",
        "broadcast_count": report.delivered,
        "live_sessions": report.live,
        "pruned": report.pruned.len(),
    }))
}

async fn list_sessions(State(state): State<HttpState>) -> impl IntoResponse {
    let sessions: Vec<_> = state
        .server
        .sessions()
        .snapshot()
        .await
        .iter()
        .map(|session| session.summary())
        .collect();
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

async fn render_metrics(State(state): State<HttpState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::ProtocolError | ErrorKind::InvalidArguments => StatusCode::BAD_REQUEST,
            ErrorKind::ResourceNotFound | ErrorKind::ToolNotFound | ErrorKind::PromptNotFound => {
                StatusCode::NOT_FOUND
            }
            ErrorKind::UnknownMethod => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::ChannelClosed => StatusCode::GONE,
            ErrorKind::BackendFailure => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": self.client_message(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::ToolRegistry;
    use crate::mcp::prompts::PromptRegistry;
    use crate::mcp::resources::{FileBackend, ResourceRegistry};
    use crate::mcp::server::ServerOptions;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> HttpState {
        let server = McpServer::new(
            ToolRegistry::new(),
            PromptRegistry::new(),
            ResourceRegistry::new(Arc::new(FileBackend::new("/nonexistent"))),
            ServerOptions::default(),
        );
        HttpState::new(server, None)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["live_sessions"], 0);
    }

    #[tokio::test]
    async fn test_post_to_unknown_session() {
        let response = router(state())
            .oneshot(
                Request::post("/messages/?session_id=nope")
                    .body(Body::from(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_without_session_id() {
        let response = router(state())
            .oneshot(Request::post("/messages").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_routes_and_rejects() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(4);
        state.routes.insert(SessionId::from("abc"), tx);
        let app = router(state.clone());

        let accepted = app
            .clone()
            .oneshot(
                Request::post("/messages/?session_id=abc")
                    .body(Body::from(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await.unwrap().method(), Some("ping"));

        let garbled = app
            .clone()
            .oneshot(
                Request::post("/messages/?session_id=abc")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(garbled.status(), StatusCode::BAD_REQUEST);

        drop(rx);
        let gone = app
            .oneshot(
                Request::post("/messages/?session_id=abc")
                    .body(Body::from(r#"{"jsonrpc":"2.0","method":"ping","id":2}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_notify_with_no_sessions() {
        let response = router(state())
            .oneshot(Request::post("/admin/notify").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["broadcast_count"], 0);
        assert_eq!(json["live_sessions"], 0);
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let response = admin_router(state())
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_router_has_no_transport() {
        let response = admin_router(state())
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_status() {
        let response = Error::ToolNotFound("x".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = Error::Backend("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
