//! Chat endpoint: admission, retrieval, streamed answer

use axum::{extract::State, response::Response};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::streaming::sse_response;
use crate::types::ChatRequest;

use super::{ApiJson, Identity};

/// POST /api/chat - Stream a cited answer as server-sent events
pub async fn chat(
    State(state): State<AppState>,
    Identity(identity): Identity,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Response> {
    let start = Instant::now();

    let limiter = state.rate_limiter();
    if !limiter.allow(&identity).await {
        let retry_after_secs = limiter.retry_after_secs(&identity).await;
        tracing::info!("Rate limited {} for {}s", identity, retry_after_secs);
        return Err(Error::RateLimited { retry_after_secs });
    }

    let question = request.question()?;
    tracing::info!("Chat question from {} ({} chars)", identity, question.chars().count());

    let context = state.retrieval().retrieve(&identity, &question).await;

    let events = state.streaming().start(&question, &context);
    tracing::debug!(
        "Answer stream ready with {} citations after {}ms",
        context.len(),
        start.elapsed().as_millis()
    );

    Ok(sse_response(events, state.config().streaming.keep_alive()))
}
