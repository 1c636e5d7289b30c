//! HTTP transport for the mirror manager
//!
//! Routes:
//! - `GET    /ping`                         - Liveness check
//! - `GET    /repo`                         - List mirror names
//! - `POST   /repo`                         - Add mirrors, one URI per body line
//! - `DELETE /repo/{namespace}/{name}`        - Remove a mirror and its data
//! - `POST   /repo/{namespace}/{name}/update` - Fetch a mirror now
//! - `POST   /repo/{namespace}/{name}/dist`   - Write tag archives

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use gmm_core::{Error, ErrorKind, MirrorManager};

/// Shared state for the handlers
pub type AppState = Arc<MirrorManager>;

/// Build the router with all routes and shared state
pub fn create_router(manager: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/repo", get(list_mirrors).post(add_mirrors))
        .route("/repo/{namespace}/{name}", delete(remove_mirror))
        .route("/repo/{namespace}/{name}/update", post(update_mirror))
        .route("/repo/{namespace}/{name}/dist", post(archive_mirror))
        .layer(middleware::from_fn(log_request))
        .with_state(manager)
}

/// A core error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        tracing::error!(error = %self.0, kind = %self.0.kind(), %status, "request failed");
        (status, format!("{}\n", self.0)).into_response()
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UserInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(%remote, method = %request.method(), uri = %request.uri(), "request");
    next.run(request).await
}

async fn ping() -> &'static str {
    "pong\n"
}

async fn list_mirrors(State(manager): State<AppState>) -> Json<Vec<String>> {
    Json(manager.names().await)
}

async fn add_mirrors(
    State(manager): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<Vec<String>>), ApiError> {
    let mut added = Vec::new();

    for uri in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        added.push(manager.add(uri).await?);
    }

    if added.is_empty() {
        return Err(Error::UserInput("request body contains no mirror uri".to_string()).into());
    }

    Ok((StatusCode::CREATED, Json(added)))
}

async fn remove_mirror(
    State(manager): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    manager.remove(&format!("{}/{}", namespace, name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_mirror(
    State(manager): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    manager.update(&format!("{}/{}", namespace, name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn archive_mirror(
    State(manager): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    let tags = manager
        .archive_tags(&format!("{}/{}", namespace, name))
        .await?;
    Ok(Json(tags))
}
