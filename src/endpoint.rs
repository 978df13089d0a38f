//! Model name to endpoint resolution.
//!
//! A [`ModelTable`] maps model names (case-insensitive) to the endpoint and API
//! version serving them, separately for chat and embedding. [`resolve`] is pure:
//! it turns a caller body into the path and JSON body that go on the wire.

use crate::error::Error;
use crate::types::RequestKind;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Default chat model when the caller does not name one.
pub const DEFAULT_CHAT_MODEL: &str = "ERNIE-Bot-turbo";

/// Default embedding model when the caller does not name one.
pub const DEFAULT_EMBEDDING_MODEL: &str = "Embedding-V1";

/// Prefix for the rpc-style (v1) model API.
const V1_PREFIX: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop";

/// Client version tag attached to every outgoing body.
const REQUEST_SOURCE: &str = concat!("qianfan_rust_sdk_v", env!("CARGO_PKG_VERSION"));

/// Which API generation an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    /// `/rpc/2.0/ai_custom/v1/wenxinworkshop/{chat|embeddings}/{endpoint}`.
    V1,
    /// `/v2/{chat/completions|embeddings}` with the endpoint passed as `model`.
    V2,
}

/// One row of the model table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub endpoint: String,
    pub version: ApiVersion,
}

impl ModelEndpoint {
    pub fn v1(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            version: ApiVersion::V1,
        }
    }

    pub fn v2(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            version: ApiVersion::V2,
        }
    }

    /// Request path for this endpoint.
    pub fn path(&self, kind: RequestKind) -> String {
        match (self.version, kind) {
            (ApiVersion::V1, RequestKind::Chat) => format!("{V1_PREFIX}/chat/{}", self.endpoint),
            (ApiVersion::V1, RequestKind::Embedding) => {
                format!("{V1_PREFIX}/embeddings/{}", self.endpoint)
            }
            (ApiVersion::V2, RequestKind::Chat) => "/v2/chat/completions".to_string(),
            (ApiVersion::V2, RequestKind::Embedding) => "/v2/embeddings".to_string(),
        }
    }
}

/// Static model lookup table, keyed by upper-cased model name.
#[derive(Debug, Clone, Default)]
pub struct ModelTable {
    chat: HashMap<String, ModelEndpoint>,
    embedding: HashMap<String, ModelEndpoint>,
}

impl ModelTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the publicly documented Qianfan models.
    pub fn builtin() -> Self {
        let chat = [
            ("ERNIE-Bot-turbo", "eb-instant"),
            ("ERNIE-Bot", "completions"),
            ("ERNIE-Bot-4", "completions_pro"),
            ("ERNIE-3.5-8K", "completions"),
            ("ERNIE-4.0-8K", "completions_pro"),
            ("ERNIE-Speed-8K", "ernie_speed"),
            ("ERNIE-Lite-8K", "ernie-lite-8k"),
        ];
        let embedding = [
            ("Embedding-V1", "embedding-v1"),
            ("bge-large-zh", "bge_large_zh"),
            ("bge-large-en", "bge_large_en"),
            ("tao-8k", "tao_8k"),
        ];

        let mut table = Self::new();
        for (name, endpoint) in chat {
            table.insert(RequestKind::Chat, name, ModelEndpoint::v1(endpoint));
        }
        for (name, endpoint) in embedding {
            table.insert(RequestKind::Embedding, name, ModelEndpoint::v1(endpoint));
        }
        table
    }

    /// Add or replace a model entry.
    pub fn insert(&mut self, kind: RequestKind, model: &str, endpoint: ModelEndpoint) {
        self.entries_mut(kind).insert(model.to_uppercase(), endpoint);
    }

    /// Builder-style [`ModelTable::insert`].
    pub fn with(mut self, kind: RequestKind, model: &str, endpoint: ModelEndpoint) -> Self {
        self.insert(kind, model, endpoint);
        self
    }

    /// Case-insensitive lookup.
    pub fn get(&self, kind: RequestKind, model: &str) -> Option<&ModelEndpoint> {
        self.entries(kind).get(&model.to_uppercase())
    }

    fn entries(&self, kind: RequestKind) -> &HashMap<String, ModelEndpoint> {
        match kind {
            RequestKind::Chat => &self.chat,
            RequestKind::Embedding => &self.embedding,
        }
    }

    fn entries_mut(&mut self, kind: RequestKind) -> &mut HashMap<String, ModelEndpoint> {
        match kind {
            RequestKind::Chat => &mut self.chat,
            RequestKind::Embedding => &mut self.embedding,
        }
    }
}

/// Resolved request: path relative to the base URL plus the wire body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub path: String,
    pub body: Value,
}

impl ResolvedRequest {
    /// Whether the body asks for a streamed response.
    pub fn streaming(&self) -> bool {
        self.body.get("stream").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Look up `model` and shape `body` for the endpoint's API version.
///
/// `body` must serialize to a JSON object.
pub fn resolve(
    table: &ModelTable,
    model: &str,
    kind: RequestKind,
    body: Value,
) -> Result<ResolvedRequest, Error> {
    let endpoint = table.get(kind, model).ok_or_else(|| Error::UnknownModel {
        model: model.to_string(),
        kind,
    })?;

    let mut map = match body {
        Value::Object(map) => map,
        other => {
            return Err(Error::config(format!(
                "request body must be a JSON object, got {other}"
            )))
        }
    };

    if map.get("stream").map_or(true, Value::is_null) {
        map.insert("stream".to_string(), Value::Bool(false));
    }

    let extra = map
        .entry("extra_parameters")
        .or_insert_with(|| Value::Object(Map::new()));
    if !extra.is_object() {
        *extra = Value::Object(Map::new());
    }
    if let Value::Object(extra) = extra {
        extra.insert(
            "request_source".to_string(),
            Value::String(REQUEST_SOURCE.to_string()),
        );
    }

    if endpoint.version == ApiVersion::V2 {
        map.insert("model".to_string(), Value::String(endpoint.endpoint.clone()));
    }

    Ok(ResolvedRequest {
        path: endpoint.path(kind),
        body: Value::Object(map),
    })
}
