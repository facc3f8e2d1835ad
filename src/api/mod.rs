pub mod auth;
pub mod error;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::context::RemoteDesktop;
use crate::mcp::RcuMcpServer;

/// Maximum concurrent MCP sessions allowed via the Streamable HTTP transport.
const MAX_MCP_SESSIONS: usize = 64;

/// Screenshots arrive inside JSON-RPC bodies, but requests stay small.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub desktop: Arc<RemoteDesktop>,
    /// Counter for active MCP sessions (Streamable HTTP transport).
    pub mcp_session_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(desktop: Arc<RemoteDesktop>) -> Self {
        Self {
            desktop,
            mcp_session_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Configuration for the HTTP router.
///
/// `token: None` disables authentication; only use it on loopback binds.
#[derive(Default)]
pub struct RouterConfig {
    pub token: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    vnc_connected: bool,
    ssh_connected: bool,
    mcp_sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (vnc_connected, ssh_connected) = tokio::join!(
        state.desktop.display().is_connected(),
        state.desktop.shell().is_connected()
    );
    Json(HealthResponse {
        status: "ok",
        vnc_connected,
        ssh_connected,
        mcp_sessions: state.mcp_session_count.load(Ordering::Acquire),
    })
}

/// Turn away requests that would open a new MCP session once the limit is
/// reached. Requests for an existing session carry its `mcp-session-id`.
async fn limit_sessions(
    State(counter): State<Arc<AtomicUsize>>,
    req: Request,
    next: Next,
) -> Result<Response, error::ApiError> {
    let opens_session = !req.headers().contains_key("mcp-session-id");
    if opens_session && counter.load(Ordering::Acquire) >= MAX_MCP_SESSIONS {
        tracing::warn!(limit = MAX_MCP_SESSIONS, "refusing MCP session");
        return Err(error::ApiError::TooManySessions);
    }
    Ok(next.run(req).await)
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };

    let mcp_desktop = state.desktop.clone();
    let mcp_counter = state.mcp_session_count.clone();
    let mcp_service = StreamableHttpService::new(
        move || {
            let current = mcp_counter.fetch_add(1, Ordering::AcqRel);
            if current >= MAX_MCP_SESSIONS {
                mcp_counter.fetch_sub(1, Ordering::Release);
                tracing::warn!(limit = MAX_MCP_SESSIONS, "refusing MCP session");
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "maximum MCP sessions reached",
                ));
            }
            Ok(RcuMcpServer::new(mcp_desktop.clone()).with_session_counter(mcp_counter.clone()))
        },
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    let protected = Router::new()
        .nest_service("/mcp", mcp_service)
        .layer(axum::middleware::from_fn_with_state(
            state.mcp_session_count.clone(),
            limit_sessions,
        ));
    let protected = match config.token {
        Some(token) => protected.layer(axum::middleware::from_fn(move |req, next| {
            let t = token.clone();
            async move { auth::require_auth(t, req, next).await }
        })),
        None => protected,
    };

    Router::new()
        .route("/health", get(health))
        .with_state(state)
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::unreachable_desktop;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn app(token: Option<&str>) -> Router {
        router(
            AppState::new(unreachable_desktop()),
            RouterConfig {
                token: token.map(str::to_string),
            },
        )
    }

    #[tokio::test]
    async fn health_reports_connection_state() {
        let response = app(None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["vnc_connected"], false);
        assert_eq!(json["ssh_connected"], false);
        assert_eq!(json["mcp_sessions"], 0);
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let response = app(Some("secret"))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mcp_requires_token_when_configured() {
        let response = app(Some("secret"))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn mcp_passes_auth_with_token() {
        let response = app(Some("secret"))
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/mcp")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn new_session_over_the_limit_is_503() {
        let state = AppState::new(unreachable_desktop());
        state.mcp_session_count.store(MAX_MCP_SESSIONS, Ordering::Release);
        let app = router(state, RouterConfig::default());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .header("accept", "application/json, text/event-stream")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "too_many_sessions");
    }

    #[tokio::test]
    async fn existing_session_passes_the_limit() {
        let state = AppState::new(unreachable_desktop());
        state.mcp_session_count.store(MAX_MCP_SESSIONS, Ordering::Release);
        let app = router(state, RouterConfig::default());

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/mcp")
                    .header("mcp-session-id", "unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let response = app(None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["referrer-policy"], "no-referrer");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let response = app(None)
            .oneshot(Request::builder().uri("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
