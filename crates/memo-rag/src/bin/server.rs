//! Memo RAG server binary
//!
//! Run with: cargo run -p memo-rag --bin memo-rag-server

use memo_rag::{config::RagConfig, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memo_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RagConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Database: {}", config.storage.database_path.display());
    tracing::info!("  - Embedding model: {} ({} dims)", config.llm.embed_model, config.embeddings.dimensions);
    tracing::info!("  - Chat model: {}", config.llm.chat_model);
    tracing::info!(
        "  - Rate limit: {} per {}ms",
        config.rate_limit.max_requests,
        config.rate_limit.window_ms
    );

    // Check Ollama
    tracing::info!("Checking Ollama at {}...", config.llm.base_url);
    let client = reqwest::Client::new();
    match client.get(format!("{}/api/tags", config.llm.base_url)).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!("Ollama is running");
        }
        _ => {
            tracing::warn!("Ollama not available at {}", config.llm.base_url);
            tracing::warn!(
                "Start it with `ollama serve` and pull the models: ollama pull {} && ollama pull {}",
                config.llm.embed_model,
                config.llm.chat_model
            );
        }
    }

    let server = RagServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API:    http://{}/api", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("\nEndpoints:");
    println!("  POST   /api/chat       - Ask a question (SSE)");
    println!("  POST   /api/memos      - Ingest a memo transcript");
    println!("  DELETE /api/memos/:id  - Delete a memo");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
