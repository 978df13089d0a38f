use crate::types::RequestKind;
use thiserror::Error;

/// Unified error type for every client operation.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable credential scheme, or an invalid client setting.
    /// Raised before any network I/O.
    #[error("config: {0}")]
    Config(String),

    /// Model name is not present in the endpoint table for this request kind.
    #[error("unknown {kind} model: {model}")]
    UnknownModel { model: String, kind: RequestKind },

    /// Malformed envelope, unexpected status, or a stream that ended without the sentinel.
    #[error("transport: {0}")]
    Transport(String),

    /// HTTP/network error.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// Well-formed error payload returned by the service.
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
}

impl Error {
    /// Returns true for network-level and malformed-response failures.
    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Http(_))
    }

    /// Create an API error from code and message.
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
