use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Request type tag threaded through endpoint resolution and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Chat,
    Embedding,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Chat => "chat",
            RequestKind::Embedding => "embedding",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message role in conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Function,
}

/// A conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }

    /// Create a function result message answering a previous `function_call`.
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            name: Some(name.into()),
            function_call: None,
        }
    }
}

/// Function definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl Function {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
}

impl FunctionCall {
    /// Parse arguments as JSON.
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// Chat completion request body.
///
/// `stream` left as `None` is sent as `false`. Fields the typed struct does not
/// cover can be passed through `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalty_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<Function>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatBody {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn functions(mut self, functions: Vec<Function>) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Add an extra top-level field.
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Embedding request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingBody {
    pub input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EmbeddingBody {
    pub fn new<I, S>(input: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: input.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Chat completion response. Each streamed chunk has the same shape, with
/// `result` carrying only that chunk's text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub sentence_id: Option<u32>,
    #[serde(default)]
    pub is_end: Option<bool>,
    #[serde(default)]
    pub is_truncated: Option<bool>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub need_clear_history: Option<bool>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Present on `/v2` replies instead of `result`.
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatResponse {
    /// Text of this response or chunk, whichever API generation produced it.
    pub fn text(&self) -> &str {
        if !self.result.is_empty() {
            return &self.result;
        }
        self.choices
            .first()
            .and_then(|c| c.message.as_ref().or(c.delta.as_ref()))
            .and_then(|m| m.content.as_deref())
            .unwrap_or_default()
    }

    /// Finish reason, from the top level or the first choice.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason
            .as_deref()
            .or_else(|| self.choices.first()?.finish_reason.as_deref())
    }
}

/// One choice of a `/v2` chat reply. Streamed chunks carry `delta`, complete
/// replies carry `message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
    #[serde(default)]
    pub delta: Option<ChoiceMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Accumulated result of a fully consumed stream.
#[derive(Debug, Clone, Default)]
pub struct ChatResult {
    pub id: Option<String>,
    pub content: String,
    pub usage: Usage,
    pub function_call: Option<FunctionCall>,
    pub finish_reason: Option<String>,
}

/// Embedding response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub data: Vec<EmbeddingData>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    #[serde(default)]
    pub object: Option<String>,
    pub embedding: Vec<f32>,
    pub index: usize,
}

/// Parse a response payload, surfacing an embedded `error_code` as [`Error::Api`].
///
/// Used for non-streamed bodies and for every streamed chunk, so both paths share
/// one definition of "this payload is an error".
pub fn decode_payload<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
    #[cfg(feature = "simd-json")]
    let value: Value = {
        let mut bytes = data.to_vec();
        simd_json::from_slice(&mut bytes)
            .map_err(|e| Error::transport(format!("malformed payload: {e}")))?
    };

    #[cfg(not(feature = "simd-json"))]
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| Error::transport(format!("malformed payload: {e}")))?;

    if let Some(err) = embedded_error(&value) {
        return Err(err);
    }

    serde_json::from_value(value).map_err(|e| Error::transport(format!("malformed payload: {e}")))
}

/// Extract the error discriminator, if set.
///
/// v1 replies carry a non-zero `error_code` with `error_msg`; `/v2` replies carry an
/// `error` object with `code` and `message`. A non-numeric v2 code is reported as
/// code 0 with the code prefixed to the message.
fn embedded_error(value: &Value) -> Option<Error> {
    if let Some(code) = value.get("error_code").and_then(Value::as_i64) {
        if code == 0 {
            return None;
        }
        let message = value
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Some(Error::api(code, message));
    }

    let err = value.get("error").filter(|e| e.is_object())?;
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match err.get("code") {
        Some(Value::Number(n)) => Some(Error::api(n.as_i64().unwrap_or_default(), message)),
        Some(Value::String(code)) => match code.parse::<i64>() {
            Ok(code) => Some(Error::api(code, message)),
            Err(_) => Some(Error::api(0, format!("{code}: {message}"))),
        },
        _ => Some(Error::api(0, message)),
    }
}
