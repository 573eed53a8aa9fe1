//! HTTP ingress.
//!
//! - `GET  /health`
//! - `GET  /{account}`: discovery profile
//! - `POST /{account}`: deliver a sealed envelope
//! - `GET  /{account}/files/{owner}/{uuid}/{hash}`: shared file content

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use murmur_core::{CoreError, DiscoveredProfile, Node};
use murmur_shared::constants::MAX_ENVELOPE_SIZE;
use murmur_shared::KeyId;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    fn check_account(&self, account: &str) -> Result<(), ApiError> {
        if account == self.node.account() {
            Ok(())
        } else {
            Err(ApiError::UnknownAccount(account.to_string()))
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Only envelope delivery is rate limited and size capped.
    let delivery = post(deliver)
        .layer(DefaultBodyLimit::max(MAX_ENVELOPE_SIZE))
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/{account}", get(discovery).merge(delivery))
        .route("/{account}/files/{owner}/{uuid}/{hash}", get(serve_file))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn discovery(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<DiscoveredProfile>, ApiError> {
    state.check_account(&account)?;
    Ok(Json(state.node.discovery_profile()))
}

/// Payloads that cannot be decoded are acknowledged and dropped: the sender
/// would only retry the same bytes. Local failures return 500 so the sender
/// keeps the event queued.
async fn deliver(
    State(state): State<AppState>,
    Path(account): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.check_account(&account)?;
    match state.node.receive(&body).await {
        Ok(applied) => {
            tracing::debug!(bytes = body.len(), applied, "Envelope received");
            Ok(StatusCode::OK)
        }
        Err(e @ (CoreError::Store(_) | CoreError::Io(_))) => Err(e.into()),
        Err(e) => {
            tracing::warn!(bytes = body.len(), error = %e, "Dropping undecodable envelope");
            Ok(StatusCode::OK)
        }
    }
}

async fn serve_file(
    State(state): State<AppState>,
    Path((account, owner, uuid, hash)): Path<(String, String, Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.check_account(&account)?;
    let path = state
        .node
        .serve_file(&KeyId::new(&owner), uuid, &hash)?
        .ok_or(ApiError::NotFound)?;
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    ))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting ingress");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
