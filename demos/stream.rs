//! Streaming chat example.
//!
//! Run with: QIANFAN_AK=... QIANFAN_SK=... cargo run --example stream
//! Add RUST_LOG=qianfan_sdk=debug to see dispatch and stream lifecycle logs.

use qianfan_sdk::{ChatBody, Client, Message, DEFAULT_CHAT_MODEL};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Create client from environment
    let client = Client::from_env()?;

    let body = ChatBody::new(vec![Message::user("Write a haiku about Rust programming.")])
        .system("You are a helpful assistant. Be concise.")
        .temperature(0.7);

    println!("Streaming from {DEFAULT_CHAT_MODEL}...\n");

    let mut stream = client.chat_stream(&body, DEFAULT_CHAT_MODEL).await?;

    // Print chunks as they arrive
    while let Some(chunk) = stream.next().await {
        print!("{}", chunk?.text());
    }

    // Get final result with usage stats
    let result = stream.finalize();

    println!("\n\n--- Stats ---");
    println!("Id: {}", result.id.unwrap_or_default());
    println!("Prompt tokens: {}", result.usage.prompt_tokens);
    println!("Completion tokens: {}", result.usage.completion_tokens);

    Ok(())
}
