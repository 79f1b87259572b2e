//! API routes for the memo RAG server

pub mod chat;
pub mod memos;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::request::Parts,
    routing::{delete, get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::chat))
        .route("/memos", post(memos::ingest_memo))
        .route("/memos/:id", delete(memos::delete_memo))
        .route("/info", get(info))
}

/// Caller identity taken from the identity header
///
/// Extracted before the body so a missing identity is always a 401.
pub struct Identity(pub String);

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.identity(&parts.headers).map(Identity)
    }
}

/// JSON body whose rejections are reported as validation errors
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(Error::validation(rejection.body_text())),
        }
    }
}

/// API info endpoint
async fn info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "memo-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Cited, streamed answers over your voice memos",
        "endpoints": {
            "POST /api/chat": "Ask a question; answers stream as server-sent events",
            "POST /api/memos": "Ingest a memo transcript",
            "DELETE /api/memos/:id": "Delete a memo",
            "GET /health": "Liveness",
            "GET /ready": "Readiness (store reachable)"
        }
    }))
}
