use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::playlist::Channel;
use crate::tv::{Status, Tv};

const INDEX_HTML: &str = include_str!("../static/index.html");

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("[server] {}", self.0);
        let status = match self.0 {
            Error::Fetch(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

pub fn router(tv: Arc<Tv>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/channels", get(list_channels))
        .route("/channels/download", get(download))
        .route("/channels/{name}/play", get(play))
        .with_state(tv)
}

pub async fn run_server(
    addr: SocketAddr,
    tv: Arc<Tv>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, router(tv))
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn status(State(tv): State<Arc<Tv>>) -> Json<Status> {
    Json(tv.status().await)
}

async fn list_channels(State(tv): State<Arc<Tv>>) -> Json<Vec<Channel>> {
    Json(tv.list().await)
}

/// `name` arrives percent-decoded from the path extractor.
async fn play(
    State(tv): State<Arc<Tv>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<bool>, ApiError> {
    Ok(Json(tv.play(&name, false).await?))
}

async fn download(
    State(tv): State<Arc<Tv>>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let count = tv.download(None, true).await?;
    Ok(Json(json!({ "channels": count })))
}
