//! HTTP client and request dispatch.

use crate::auth::{
    Authorization, CredentialConfig, CredentialStore, DEFAULT_AUTH_TIMEOUT,
    DEFAULT_SIGN_EXPIRATION_SECS,
};
use crate::endpoint::{resolve, ModelTable, ResolvedRequest};
use crate::error::Error;
use crate::stream::{ByteStream, ChatStream};
use crate::types::*;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default API host for both model calls and token exchange.
pub const DEFAULT_BASE_URL: &str = "https://aip.baidubce.com";

/// Main client for chat and embedding requests.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    models: Arc<ModelTable>,
    config: ClientConfig,
}

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Host prefix for model calls.
    pub base_url: String,
    /// Host prefix for the token exchange.
    pub auth_base_url: String,
    /// Timeout for non-streamed calls and connection setup of streamed ones.
    pub timeout: Duration,
    /// Timeout for the token exchange.
    pub auth_timeout: Duration,
    /// Validity window written into each request signature.
    pub sign_expiration_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            sign_expiration_secs: DEFAULT_SIGN_EXPIRATION_SECS,
        }
    }
}

/// Builder for Client.
///
/// Settings apply in call order, so call [`ClientBuilder::from_env`] first if
/// explicit values should win over the environment.
pub struct ClientBuilder {
    credentials: CredentialConfig,
    models: ModelTable,
    config: ClientConfig,
    http_builder: reqwest::ClientBuilder,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            credentials: CredentialConfig::default(),
            models: ModelTable::builtin(),
            config: ClientConfig::default(),
            http_builder: reqwest::Client::builder().tcp_nodelay(true),
        }
    }

    /// Use the token-exchange scheme with an app key pair.
    pub fn ak_sk(mut self, ak: impl Into<String>, sk: impl Into<String>) -> Self {
        self.credentials.ak = Some(ak.into());
        self.credentials.sk = Some(SecretString::from(sk.into()));
        self
    }

    /// Use the signed-request scheme with an access key pair.
    pub fn access_key(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.credentials.access_key = Some(access_key.into());
        self.credentials.secret_key = Some(SecretString::from(secret_key.into()));
        self
    }

    /// Set a custom base URL for model calls (useful for testing with mock servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set a custom base URL for the token exchange.
    pub fn auth_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.auth_base_url = url.into();
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set token exchange timeout.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout = timeout;
        self
    }

    /// Set how long each request signature stays valid.
    pub fn sign_expiration(mut self, secs: u64) -> Self {
        self.config.sign_expiration_secs = secs;
        self
    }

    /// Replace the model lookup table.
    pub fn model_table(mut self, models: ModelTable) -> Self {
        self.models = models;
        self
    }

    /// Load credentials and endpoints from environment variables.
    pub fn from_env(mut self) -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(ak) = var("QIANFAN_AK") {
            self.credentials.ak = Some(ak);
        }
        if let Some(sk) = var("QIANFAN_SK") {
            self.credentials.sk = Some(SecretString::from(sk));
        }
        if let Some(access_key) = var("QIANFAN_ACCESS_KEY") {
            self.credentials.access_key = Some(access_key);
        }
        if let Some(secret_key) = var("QIANFAN_SECRET_KEY") {
            self.credentials.secret_key = Some(SecretString::from(secret_key));
        }
        if let Some(url) = var("QIANFAN_BASE_URL") {
            self.config.base_url = url.clone();
            self.config.auth_base_url = url;
        }
        if let Some(secs) = var("QIANFAN_IAM_SIGN_EXPIRATION_SEC") {
            match secs.parse() {
                Ok(secs) => self.config.sign_expiration_secs = secs,
                Err(_) => warn!(value = %secs, "ignoring invalid QIANFAN_IAM_SIGN_EXPIRATION_SEC"),
            }
        }
        if let Some(secs) = var("QIANFAN_AUTH_TIMEOUT") {
            match secs.parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok()) {
                Some(timeout) => self.config.auth_timeout = timeout,
                None => warn!(value = %secs, "ignoring invalid QIANFAN_AUTH_TIMEOUT"),
            }
        }

        self
    }

    /// Build the client. Credentials are validated on first use, not here.
    pub fn build(self) -> Result<Client, Error> {
        let http = self
            .http_builder
            .connect_timeout(self.config.timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let credentials = CredentialStore::new(self.credentials, self.config.auth_base_url.clone())
            .with_sign_expiration(self.config.sign_expiration_secs)
            .with_timeout(self.config.auth_timeout);

        Ok(Client {
            http,
            credentials: Arc::new(credentials),
            models: Arc::new(self.models),
            config: self.config,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply to [`Client::chat`]: one response, or a stream when `stream` was set.
#[derive(Debug)]
pub enum ChatReply {
    /// The whole reply, for `stream: false`.
    Complete(ChatResponse),
    /// Incremental chunks, for `stream: true`.
    Stream(ChatStream<ByteStream>),
}

impl ChatReply {
    /// The complete reply, or `None` for a stream.
    pub fn into_complete(self) -> Option<ChatResponse> {
        match self {
            ChatReply::Complete(resp) => Some(resp),
            ChatReply::Stream(_) => None,
        }
    }

    /// The stream, or `None` for a complete reply.
    pub fn into_stream(self) -> Option<ChatStream<ByteStream>> {
        match self {
            ChatReply::Complete(_) => None,
            ChatReply::Stream(stream) => Some(stream),
        }
    }
}

impl Client {
    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        ClientBuilder::new().from_env().build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Credential store shared by all clones of this client.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Send a chat request. `body.stream` picks the reply shape.
    pub async fn chat(&self, body: &ChatBody, model: &str) -> Result<ChatReply, Error> {
        let resolved = self.prepare(RequestKind::Chat, model, body)?;
        if resolved.streaming() {
            self.execute_stream(&resolved, model).await.map(ChatReply::Stream)
        } else {
            self.execute_complete(&resolved, RequestKind::Chat, model)
                .await
                .map(ChatReply::Complete)
        }
    }

    /// Send a non-streaming chat request, whatever `body.stream` says.
    pub async fn chat_complete(&self, body: &ChatBody, model: &str) -> Result<ChatResponse, Error> {
        let mut resolved = self.prepare(RequestKind::Chat, model, body)?;
        resolved.body["stream"] = Value::Bool(false);
        self.execute_complete(&resolved, RequestKind::Chat, model).await
    }

    /// Send a streaming chat request, whatever `body.stream` says.
    pub async fn chat_stream(
        &self,
        body: &ChatBody,
        model: &str,
    ) -> Result<ChatStream<ByteStream>, Error> {
        let mut resolved = self.prepare(RequestKind::Chat, model, body)?;
        resolved.body["stream"] = Value::Bool(true);
        self.execute_stream(&resolved, model).await
    }

    /// Send an embedding request.
    pub async fn embedding(
        &self,
        body: &EmbeddingBody,
        model: &str,
    ) -> Result<EmbeddingResponse, Error> {
        let resolved = self.prepare(RequestKind::Embedding, model, body)?;
        self.execute_complete(&resolved, RequestKind::Embedding, model)
            .await
    }

    fn prepare<B: Serialize>(
        &self,
        kind: RequestKind,
        model: &str,
        body: &B,
    ) -> Result<ResolvedRequest, Error> {
        let body = serde_json::to_value(body)
            .map_err(|e| Error::config(format!("request body is not serializable: {e}")))?;
        resolve(&self.models, model, kind, body)
    }

    /// Compose URL, headers and auth for one call.
    async fn build_request(&self, resolved: &ResolvedRequest) -> Result<reqwest::Request, Error> {
        let auth = self.credentials.get_or_refresh(&self.http).await?;

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), resolved.path);
        let body = serde_json::to_vec(&resolved.body)
            .map_err(|e| Error::config(format!("request body is not serializable: {e}")))?;

        let mut builder = self.http.post(&url).headers(default_headers()).body(body);
        if let Authorization::Bearer(token) = &auth {
            builder = builder.query(&[("access_token", token.as_str())]);
        }

        let mut request = builder.build()?;
        if let Authorization::Signed(signer) = &auth {
            signer.sign(&mut request)?;
        }
        Ok(request)
    }

    /// Execute a non-streaming request.
    async fn execute_complete<T: DeserializeOwned>(
        &self,
        resolved: &ResolvedRequest,
        kind: RequestKind,
        model: &str,
    ) -> Result<T, Error> {
        let mut request = self.build_request(resolved).await?;
        *request.timeout_mut() = Some(self.config.timeout);
        debug!(%kind, model, path = %resolved.path, "sending request");

        let resp = self.http.execute(request).await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            return Err(status_error(status, &bytes));
        }
        decode_payload(&bytes)
    }

    /// Execute a streaming request. Returns as soon as response headers arrive.
    async fn execute_stream(
        &self,
        resolved: &ResolvedRequest,
        model: &str,
    ) -> Result<ChatStream<ByteStream>, Error> {
        let request = self.build_request(resolved).await?;
        debug!(kind = %RequestKind::Chat, model, path = %resolved.path, "sending streaming request");

        let resp = self.http.execute(request).await?;
        let status = resp.status();

        if !status.is_success() {
            let bytes = resp.bytes().await?;
            return Err(status_error(status, &bytes));
        }

        // Request-level failures come back as a plain JSON body even when streaming.
        if is_json(resp.headers()) {
            let bytes = resp.bytes().await?;
            decode_payload::<Value>(&bytes)?;
            return Err(Error::transport(
                "expected an event stream, got application/json",
            ));
        }

        Ok(ChatStream::new(Box::pin(resp.bytes_stream())))
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Convert a non-2xx response to an error, preferring the embedded API error.
fn status_error(status: StatusCode, body: &[u8]) -> Error {
    match decode_payload::<Value>(body) {
        Err(err @ Error::Api { .. }) => err,
        _ => Error::transport(format!("unexpected status {}", status.as_u16())),
    }
}
