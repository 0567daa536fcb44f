//! HTTP RPC surface of a scanner instance
//!
//! Exposes the public scan API plus the privileged intra-grid endpoints.
//! Every response uses the `ApiResponse` envelope. Transport-level auth is a
//! shared-token header check; the privileged endpoints additionally carry
//! the master's grid token in their bodies and are gated inside the
//! coordinator, which answers plain `false` on a mismatch.

use std::net::SocketAddr;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Error;
use crate::grid::client::{
    ApiResponse, ElementIdsRequest, InstanceDescriptor, IssuesRequest, PageQueueRequest,
    RestrictElementsRequest, RestrictPathsRequest, SetMasterRequest, SlaveDoneRequest,
    AUTH_HEADER,
};
use crate::metrics;
use crate::scan::coordinator::ScanCoordinator;
use crate::scan::progress::ProgressOptions;

// ============================================================================
// App State
// ============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: ScanCoordinator,
}

/// Identity payload of `GET /api/instance`
#[derive(Debug, Serialize)]
struct InstanceResponse {
    url: String,
    token: String,
}

// ============================================================================
// Router
// ============================================================================

/// Build the full router for one instance
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Scan lifecycle
        .route("/api/scan/run", post(run))
        .route("/api/scan/pause", post(pause))
        .route("/api/scan/resume", post(resume))
        .route("/api/scan/clean_up", post(clean_up))
        .route("/api/scan/busy", get(busy))
        .route("/api/scan/status", get(status))
        .route("/api/scan/stats", get(stats))
        .route("/api/scan/progress", post(progress))
        .route("/api/scan/issues", get(issues))
        .route("/api/scan/issues/summaries", get(issue_summaries))
        .route("/api/scan/report", get(report))
        .route("/api/scan/report/:name", get(report_as))
        // Component listings and identity
        .route("/api/modules", get(modules))
        .route("/api/plugins", get(plugins))
        .route("/api/version", get(version))
        .route("/api/revision", get(revision))
        .route("/api/instance", get(instance))
        // Grid control
        .route("/api/grid/role", get(role))
        .route("/api/grid/enslave", post(enslave))
        .route("/api/grid/set_as_master", post(set_as_master))
        .route("/api/grid/set_master", post(set_master))
        // Privileged intra-grid surface
        .route("/api/grid/restrict_paths", post(restrict_paths))
        .route("/api/grid/restrict_to_elements", post(restrict_to_elements))
        .route("/api/grid/element_ids_per_page", post(element_ids_per_page))
        .route("/api/grid/page_queue", post(page_queue))
        .route("/api/grid/slave_done", post(slave_done))
        .route("/api/grid/issues", post(register_issues))
        .route("/api/grid/issue_summaries", post(register_issue_summaries))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state);

    Router::new()
        .route("/metrics", get(export_metrics))
        .merge(api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Bind a listener for the RPC surface
///
/// Binding before building the coordinator lets callers use port 0 and feed
/// the real port back into the instance's options.
pub async fn bind(addr: SocketAddr) -> crate::error::Result<tokio::net::TcpListener> {
    Ok(tokio::net::TcpListener::bind(addr).await?)
}

/// Serve the RPC surface on an already-bound listener, in a background task
pub fn serve_on(
    listener: tokio::net::TcpListener,
    coordinator: ScanCoordinator,
) -> crate::error::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = router(AppState { coordinator });
    let bound = listener.local_addr()?;

    info!(address = %bound, "instance RPC surface listening");
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "RPC server terminated");
        }
    });

    Ok((bound, handle))
}

/// Bind the instance's RPC surface and serve it in a background task
pub async fn spawn(
    coordinator: ScanCoordinator,
    addr: SocketAddr,
) -> crate::error::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = bind(addr).await?;
    serve_on(listener, coordinator)
}

// ============================================================================
// Transport auth
// ============================================================================

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented != state.coordinator.public_token() {
        metrics::unauthorized_call();
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<bool>::err("invalid instance token")),
        )
            .into_response();
    }

    next.run(request).await
}

// ============================================================================
// Scan handlers
// ============================================================================

async fn run(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.run().await))
}

async fn pause(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.pause().await))
}

async fn resume(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.resume().await))
}

async fn clean_up(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.clean_up_response().await))
}

async fn busy(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.busy()))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.status().await))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.stats().await))
}

async fn progress(
    State(state): State<AppState>,
    Json(opts): Json<ProgressOptions>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.progress(opts).await))
}

async fn issues(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.issues().await))
}

async fn issue_summaries(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.issue_summaries().await))
}

async fn report(State(state): State<AppState>) -> Response {
    render_report(&state, "json").await
}

async fn report_as(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    render_report(&state, &name).await
}

async fn render_report(state: &AppState, name: &str) -> Response {
    match state.coordinator.report_as(name).await {
        Ok(bytes) => {
            let rendered = String::from_utf8_lossy(&bytes).into_owned();
            Json(ApiResponse::ok(rendered)).into_response()
        }
        Err(e @ Error::ComponentNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<String>::err(e.to_string())),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<String>::err(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Identity handlers
// ============================================================================

async fn modules(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.list_modules()))
}

async fn plugins(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.list_plugins().await))
}

async fn version(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.version().to_string()))
}

async fn revision(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.revision().to_string()))
}

async fn instance(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(InstanceResponse {
        url: state.coordinator.self_url().to_string(),
        token: state.coordinator.public_token().to_string(),
    }))
}

// ============================================================================
// Grid handlers
// ============================================================================

async fn role(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state.coordinator.role().await.as_str().to_string(),
    ))
}

async fn enslave(
    State(state): State<AppState>,
    Json(descriptor): Json<InstanceDescriptor>,
) -> Response {
    match state.coordinator.enslave(descriptor).await {
        Ok(enslaved) => Json(ApiResponse::ok(enslaved)).into_response(),
        Err(e @ Error::MissingField(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<bool>::err(e.to_string())),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::<bool>::err(e.to_string())),
        )
            .into_response(),
    }
}

async fn set_as_master(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.set_as_master().await))
}

async fn set_master(
    State(state): State<AppState>,
    Json(request): Json<SetMasterRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(state.coordinator.set_master(request).await))
}

// ============================================================================
// Privileged handlers
// ============================================================================

async fn restrict_paths(
    State(state): State<AppState>,
    Json(request): Json<RestrictPathsRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state
            .coordinator
            .restrict_paths(request.paths, &request.token)
            .await,
    ))
}

async fn restrict_to_elements(
    State(state): State<AppState>,
    Json(request): Json<RestrictElementsRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state
            .coordinator
            .restrict_to_elements(request.elements, &request.token)
            .await,
    ))
}

async fn element_ids_per_page(
    State(state): State<AppState>,
    Json(request): Json<ElementIdsRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state
            .coordinator
            .update_element_ids_per_page(
                request.entries,
                &request.token,
                request.signal_done_peer_url,
            )
            .await,
    ))
}

async fn page_queue(
    State(state): State<AppState>,
    Json(request): Json<PageQueueRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state
            .coordinator
            .update_page_queue(request.pages, &request.token)
            .await,
    ))
}

async fn slave_done(
    State(state): State<AppState>,
    Json(request): Json<SlaveDoneRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state
            .coordinator
            .slave_done(request.url, &request.token)
            .await,
    ))
}

async fn register_issues(
    State(state): State<AppState>,
    Json(request): Json<IssuesRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state
            .coordinator
            .register_issues(request.issues, &request.token)
            .await,
    ))
}

async fn register_issue_summaries(
    State(state): State<AppState>,
    Json(request): Json<IssuesRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state
            .coordinator
            .register_issue_summaries(request.issues, &request.token)
            .await,
    ))
}

// ============================================================================
// Metrics
// ============================================================================

async fn export_metrics() -> Response {
    match metrics::export() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
