//! Embedding example.
//!
//! Run with: QIANFAN_ACCESS_KEY=... QIANFAN_SECRET_KEY=... cargo run --example embedding

use qianfan_sdk::{Client, EmbeddingBody, DEFAULT_EMBEDDING_MODEL};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = Client::from_env()?;

    let body = EmbeddingBody::new(["Rust is a systems language.", "Tokio is an async runtime."]);
    let resp = client.embedding(&body, DEFAULT_EMBEDDING_MODEL).await?;

    for item in &resp.data {
        let preview: Vec<String> = item.embedding.iter().take(4).map(|v| format!("{v:.4}")).collect();
        println!("[{}] dim={} [{} ...]", item.index, item.embedding.len(), preview.join(", "));
    }

    if let Some(usage) = resp.usage {
        println!("\nTotal tokens: {}", usage.total_tokens);
    }

    Ok(())
}
