//! End-to-end tests for the HTTP API
//!
//! The router runs against an in-memory SQLite database and scripted
//! embedding/completion providers, so no Ollama server is needed.

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tower::ServiceExt;

use memo_rag::config::RagConfig;
use memo_rag::error::{Error, Result};
use memo_rag::providers::{
    ChunkStore, CompletionProvider, EmbeddingProvider, SqliteChunkStore, TokenStream,
};
use memo_rag::ratelimit::SqliteRateLimitStore;
use memo_rag::server::{build_router, state::AppState};
use memo_rag::storage::MemoDb;
use memo_rag::types::{ChunkRecord, StreamEvent};

const DIMS: usize = 16;

/// Bag-of-words hashing embedder
struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0; DIMS];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            v[bucket % DIMS] += 1.0;
        }
        v[0] += 0.01;
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "hash"
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _: &str) -> Result<Vec<f32>> {
        Err(Error::unavailable("embeddings", "model not loaded"))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Completion that replies with fixed tokens, or refuses to start
struct ScriptedChat {
    tokens: Option<Vec<&'static str>>,
}

#[async_trait]
impl CompletionProvider for ScriptedChat {
    async fn stream_complete(&self, _: &str, _: &str) -> Result<TokenStream> {
        match &self.tokens {
            Some(tokens) => {
                let items: Vec<Result<String>> = tokens.iter().map(|t| Ok(t.to_string())).collect();
                Ok(stream::iter(items).boxed())
            }
            None => Err(Error::unavailable("completion", "connection refused")),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.tokens.is_some())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }
}

struct TestApp {
    router: Router,
    store: Arc<dyn ChunkStore>,
}

fn app_with(embedder: Arc<dyn EmbeddingProvider>, chat: ScriptedChat) -> TestApp {
    let db = Arc::new(MemoDb::in_memory().unwrap());
    let store: Arc<dyn ChunkStore> = Arc::new(SqliteChunkStore::new(Arc::clone(&db)));
    let state = AppState::from_parts(
        RagConfig::default(),
        Arc::clone(&store),
        embedder,
        Arc::new(chat),
        Arc::new(SqliteRateLimitStore::new(db)),
    );

    TestApp {
        router: build_router(state),
        store,
    }
}

fn app() -> TestApp {
    app_with(
        Arc::new(HashEmbedder),
        ScriptedChat {
            tokens: Some(vec!["Here is ", "", "what you said."]),
        },
    )
}

fn chat_request(identity: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(id) = identity {
        builder = builder.header("x-user-id", id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn question(text: &str) -> String {
    serde_json::json!({ "messages": [{ "role": "user", "content": text }] }).to_string()
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn sse_events(response: Response) -> Vec<StreamEvent> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

fn assert_well_ordered(events: &[StreamEvent]) {
    assert!(matches!(events.first(), Some(StreamEvent::Citations { .. })));
    assert!(events.last().map(StreamEvent::is_terminal).unwrap_or(false));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events[1..events.len() - 1]
        .iter()
        .all(|e| matches!(e, StreamEvent::Delta { .. })));
}

async fn ingest(app: &TestApp, identity: &str, memo_id: &str, transcript: &str) -> Response {
    let body = serde_json::json!({ "memoId": memo_id, "transcript": transcript }).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/api/memos")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", identity)
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

#[tokio::test]
async fn empty_corpus_streams_empty_citations_then_done() {
    let app = app();
    let response = send(&app, chat_request(Some("alice"), &question("What did I plan?"))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(headers["x-accel-buffering"], "no");

    let events = sse_events(response).await;
    assert_eq!(events[0], StreamEvent::Citations { citations: vec![] });
    assert_well_ordered(&events);
    assert_eq!(events.last(), Some(&StreamEvent::Done));

    // Empty increments are not forwarded
    let deltas: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Delta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Here is ", "what you said."]);
}

#[tokio::test]
async fn ingested_memo_is_cited() {
    let app = app();
    let response = ingest(
        &app,
        "alice",
        "memo-garden",
        "Plant the tomatoes next to the basil. The garden needs compost in April.",
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["memoId"], "memo-garden");
    assert!(body["chunks"].as_u64().unwrap() >= 1);

    let response = send(
        &app,
        chat_request(Some("alice"), &question("What does the garden need?")),
    )
    .await;
    let events = sse_events(response).await;
    assert_well_ordered(&events);
    match &events[0] {
        StreamEvent::Citations { citations } => {
            assert!(!citations.is_empty());
            assert!(citations.iter().all(|c| c.memo_id == "memo-garden"));
        }
        other => panic!("expected citations, got {:?}", other),
    }

    // Another identity sees none of alice's memos
    let events = sse_events(
        send(&app, chat_request(Some("bob"), &question("What does the garden need?"))).await,
    )
    .await;
    assert_eq!(events[0], StreamEvent::Citations { citations: vec![] });
}

#[tokio::test]
async fn embedding_failure_falls_back_to_keywords() {
    let app = app_with(
        Arc::new(FailingEmbedder),
        ScriptedChat {
            tokens: Some(vec!["Under the flowerpot."]),
        },
    );

    let key = ChunkRecord::new(
        "alice",
        "memo-key",
        0,
        "The spare key is under the blue flowerpot.",
        vec![1.0; DIMS],
    )
    .with_keywords(vec!["spare".to_string(), "key".to_string(), "flowerpot".to_string()]);
    let other = ChunkRecord::new("alice", "memo-gym", 0, "Gym at seven on Thursday.", vec![1.0; DIMS]);
    app.store.write_chunks(&[key, other]).await.unwrap();

    let response = send(
        &app,
        chat_request(Some("alice"), &question("Where did I leave the spare key?")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let events = sse_events(response).await;
    assert_well_ordered(&events);
    match &events[0] {
        StreamEvent::Citations { citations } => {
            assert_eq!(citations.len(), 1);
            assert_eq!(citations[0].memo_id, "memo-key");
            assert_eq!(citations[0].chunk_index, 0);
        }
        other => panic!("expected citations, got {:?}", other),
    }
}

#[tokio::test]
async fn thirty_five_requests_admit_thirty() {
    let app = app();
    let mut ok = 0;
    let mut retry_afters = Vec::new();

    for _ in 0..35 {
        let response = send(&app, chat_request(Some("busy-user"), &question("Anything new?"))).await;
        match response.status() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after: u64 = response.headers()[header::RETRY_AFTER]
                    .to_str()
                    .unwrap()
                    .parse()
                    .unwrap();
                assert!((1..=60).contains(&retry_after));

                let body = json_body(response).await;
                assert_eq!(body["code"], "rate_limited");
                assert_eq!(body["retryAfter"].as_u64(), Some(retry_after));
                retry_afters.push(retry_after);
            }
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(ok, 30);
    assert_eq!(retry_afters.len(), 5);
    // Every rejection points at the same window end
    assert!(
        retry_afters.windows(2).all(|pair| pair[0] <= pair[1]),
        "retry-after went down: {:?}",
        retry_afters
    );

    // Limits are per identity
    let response = send(&app, chat_request(Some("quiet-user"), &question("Anything new?"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = app();
    let response = send(&app, chat_request(None, &question("Hello?"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "unauthorized");

    // Identity is checked before the body
    let response = send(&app, chat_request(None, "not json")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_requests_are_validation_errors() {
    let app = app();

    for body in [
        "not json".to_string(),
        r#"{"messages": []}"#.to_string(),
        question("   "),
        question(&"x".repeat(5_001)),
    ] {
        let response = send(&app, chat_request(Some("alice"), &body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(json_body(response).await["code"], "validation_error");
    }
}

#[tokio::test]
async fn completion_unavailable_is_an_in_stream_error() {
    let app = app_with(Arc::new(HashEmbedder), ScriptedChat { tokens: None });
    let response = send(&app, chat_request(Some("alice"), &question("Hello?"))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let events = sse_events(response).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::Citations { citations: vec![] });
    match &events[1] {
        StreamEvent::Error { error } => assert!(error.contains("temporarily unavailable")),
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn deleted_memo_is_no_longer_cited() {
    let app = app();
    ingest(&app, "alice", "memo-trip", "Flight to Lisbon leaves Friday at nine.").await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/memos/memo-trip")
        .header("x-user-id", "alice")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["memoId"], "memo-trip");
    assert_eq!(body["chunksDeleted"], 1);

    let events = sse_events(
        send(&app, chat_request(Some("alice"), &question("When is my flight?"))).await,
    )
    .await;
    assert_eq!(events[0], StreamEvent::Citations { citations: vec![] });
}

#[tokio::test]
async fn health_and_readiness() {
    let app = app();

    let response = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, Request::get("/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["ready"], true);
}
