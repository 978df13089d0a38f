//! Async Qianfan (ERNIE) chat and embedding client with streaming SSE decoding.
//!
//! # Example
//! ```no_run
//! use qianfan_sdk::{ChatBody, Client, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), qianfan_sdk::Error> {
//!     let client = Client::from_env()?;
//!     let body = ChatBody::new(vec![Message::user("Hello!")]);
//!
//!     let mut stream = client.chat_stream(&body, "ERNIE-Bot-turbo").await?;
//!
//!     while let Some(chunk) = stream.next().await {
//!         print!("{}", chunk?.text());
//!     }
//!
//!     let result = stream.finalize();
//!     println!("\nTokens: {} in, {} out", result.usage.prompt_tokens, result.usage.completion_tokens);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod sign;
pub mod sse;
pub mod stream;
pub mod types;

pub use auth::{AccessToken, Authorization, CredentialConfig, CredentialStore};
pub use client::{ChatReply, Client, ClientBuilder, ClientConfig};
pub use endpoint::{
    ApiVersion, ModelEndpoint, ModelTable, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL,
};
pub use error::Error;
pub use stream::{ByteStream, ChatStream};
pub use types::*;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
