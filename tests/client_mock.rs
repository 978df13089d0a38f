//! Integration tests against a wiremock server standing in for the Qianfan API.

use qianfan_sdk::{
    ChatBody, ChatReply, Client, EmbeddingBody, Error, Message, ModelEndpoint, ModelTable, RequestKind,
};
use serde_json::json;
use wiremock::matchers::{any, body_partial_json, header_exists, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT_PATH: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/eb-instant";
const EMBEDDING_PATH: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop/embeddings/embedding-v1";
const TOKEN_PATH: &str = "/oauth/2.0/token";

fn chat_response(result: &str) -> serde_json::Value {
    json!({
        "id": "as-abc123",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "result": result,
        "is_truncated": false,
        "need_clear_history": false,
        "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
    })
}

fn token_response(expires_in: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "24.test-token",
        "expires_in": expires_in,
        "refresh_token": "25.refresh",
        "scope": "public"
    }))
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

fn client_for(server: &MockServer) -> qianfan_sdk::ClientBuilder {
    Client::builder()
        .base_url(server.uri())
        .auth_base_url(server.uri())
}

fn ak_client(server: &MockServer) -> Client {
    client_for(server).ak_sk("test-ak", "test-sk").build().unwrap()
}

async fn mount_token(server: &MockServer, expires_in: i64, expected: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(query_param("grant_type", "client_credentials"))
        .and(query_param("client_id", "test-ak"))
        .and(query_param("client_secret", "test-sk"))
        .respond_with(token_response(expires_in))
        .expect(expected)
        .mount(server)
        .await;
}

fn hello() -> ChatBody {
    ChatBody::new(vec![Message::user("Hello")])
}

#[tokio::test]
async fn test_no_credentials_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server).build().unwrap();
    let err = client.chat(&hello(), "ERNIE-Bot-turbo").await.unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err:?}");

    let err = client
        .embedding(&EmbeddingBody::new(["text"]), "Embedding-V1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err:?}");

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_model_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = ak_client(&server);
    let err = client.chat(&hello(), "not-a-model").await.unwrap_err();
    assert!(matches!(err, Error::UnknownModel { .. }), "{err:?}");

    // Embedding models are not valid chat models.
    let err = client.chat(&hello(), "Embedding-V1").await.unwrap_err();
    assert!(matches!(err, Error::UnknownModel { .. }), "{err:?}");
}

#[tokio::test]
async fn test_token_is_cached_within_validity() {
    let server = MockServer::start().await;
    mount_token(&server, 2_592_000, 1).await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(query_param("access_token", "24.test-token"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("Hi there")))
        .expect(2)
        .mount(&server)
        .await;

    let client = ak_client(&server);
    for _ in 0..2 {
        let resp = client.chat_complete(&hello(), "ERNIE-Bot-turbo").await.unwrap();
        assert_eq!(resp.result, "Hi there");
        assert_eq!(resp.usage.unwrap().total_tokens, 8);
    }
    assert!(client.credentials().cached_token().is_some());
}

#[tokio::test]
async fn test_expired_token_is_refreshed() {
    let server = MockServer::start().await;
    // Expires immediately: every call needs a new exchange.
    mount_token(&server, 0, 2).await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("ok")))
        .expect(2)
        .mount(&server)
        .await;

    let client = ak_client(&server);
    client.chat_complete(&hello(), "ERNIE-Bot-turbo").await.unwrap();
    client.chat_complete(&hello(), "ERNIE-Bot-turbo").await.unwrap();
}

#[tokio::test]
async fn test_clones_share_token_cache() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("ok")))
        .mount(&server)
        .await;

    let client = ak_client(&server);
    let clone = client.clone();
    client.chat_complete(&hello(), "ERNIE-Bot-turbo").await.unwrap();
    clone.chat_complete(&hello(), "ERNIE-Bot-turbo").await.unwrap();
}

#[tokio::test]
async fn test_token_exchange_failure_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "unknown client id"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = ak_client(&server)
        .chat(&hello(), "ERNIE-Bot-turbo")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(ref m) if m.contains("invalid_client")), "{err:?}");
}

#[tokio::test]
async fn test_token_without_access_token_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"expires_in": 100})))
        .mount(&server)
        .await;

    let err = ak_client(&server)
        .chat(&hello(), "ERNIE-Bot-turbo")
        .await
        .unwrap_err();
    assert!(err.is_transport(), "{err:?}");
}

#[tokio::test]
async fn test_signed_scheme_skips_token_exchange() {
    let server = MockServer::start().await;
    Mock::given(path(TOKEN_PATH))
        .respond_with(token_response(3600))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header_exists("x-bce-date"))
        .and(header_regex(
            "authorization",
            r"^bce-auth-v1/test-access/\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z/300/content-type;host;x-bce-date/[0-9a-f]{64}$",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("signed")))
        .expect(1)
        .mount(&server)
        .await;

    // Both schemes configured: signed wins.
    let client = client_for(&server)
        .ak_sk("test-ak", "test-sk")
        .access_key("test-access", "test-secret")
        .build()
        .unwrap();
    let resp = client.chat_complete(&hello(), "ernie-bot-turbo").await.unwrap();
    assert_eq!(resp.result, "signed");
    assert!(client.credentials().cached_token().is_none());
}

#[tokio::test]
async fn test_error_payload_is_api_error() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 336_003,
            "error_msg": "the number of messages should be odd"
        })))
        .mount(&server)
        .await;

    let err = ak_client(&server)
        .chat(&hello(), "ERNIE-Bot-turbo")
        .await
        .unwrap_err();
    match err {
        Error::Api { code, message } => {
            assert_eq!(code, 336_003);
            assert_eq!(message, "the number of messages should be odd");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

fn v2_client(server: &MockServer) -> Client {
    client_for(server)
        .ak_sk("test-ak", "test-sk")
        .model_table(ModelTable::new().with(
            RequestKind::Chat,
            "ernie-4.0-8k",
            ModelEndpoint::v2("ernie-4.0-8k"),
        ))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_v2_error_object_is_api_error() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v2/chat/completions"))
        .and(body_partial_json(json!({"model": "ernie-4.0-8k"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "as-1",
            "error": {"code": "invalid_model", "message": "model not found"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = v2_client(&server)
        .chat_complete(&hello(), "ERNIE-4.0-8K")
        .await
        .unwrap_err();
    match err {
        Error::Api { message, .. } => assert_eq!(message, "invalid_model: model not found"),
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_v2_chat_reads_choices() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path("/v2/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "as-2",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        })))
        .mount(&server)
        .await;

    let resp = v2_client(&server)
        .chat_complete(&hello(), "ernie-4.0-8k")
        .await
        .unwrap();
    assert_eq!(resp.text(), "Hi there");
    assert_eq!(resp.finish_reason(), Some("stop"));
}

#[tokio::test]
async fn test_server_error_is_transport_error() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let err = ak_client(&server)
        .chat(&hello(), "ERNIE-Bot-turbo")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(ref m) if m.contains("503")), "{err:?}");
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Grab a free port and release it so nothing is listening there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::builder()
        .base_url(format!("http://{addr}"))
        .access_key("test-access", "test-secret")
        .build()
        .unwrap();
    let err = client.chat(&hello(), "ERNIE-Bot-turbo").await.unwrap_err();
    assert!(matches!(err, Error::Http(_)), "{err:?}");
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_streaming_chat() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse(concat!(
            "data: {\"id\":\"as-1\",\"sentence_id\":0,\"is_end\":false,\"result\":\"Hel\"}\n\n",
            ": keep-alive\n\n",
            "data: {\"id\":\"as-1\",\"sentence_id\":1,\"is_end\":false,\"result\":\"lo\",",
            "\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2,\"total_tokens\":3}}\n\n",
            "data: [DONE]\n\n",
        )))
        .mount(&server)
        .await;

    let reply = ak_client(&server)
        .chat(&hello().stream(true), "ERNIE-Bot-turbo")
        .await
        .unwrap();
    let mut stream = match reply {
        ChatReply::Stream(stream) => stream,
        ChatReply::Complete(resp) => panic!("expected stream, got {resp:?}"),
    };

    let mut sentence_ids = Vec::new();
    while let Some(chunk) = stream.next().await {
        sentence_ids.push(chunk.unwrap().sentence_id.unwrap());
    }
    assert_eq!(sentence_ids, vec![0, 1]);
    assert!(stream.is_done());

    let result = stream.finalize();
    assert_eq!(result.content, "Hello");
    assert_eq!(result.usage.total_tokens, 3);
}

#[tokio::test]
async fn test_streaming_truncated_body() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(sse("data: {\"id\":\"1\"}\n\n"))
        .mount(&server)
        .await;

    let mut stream = ak_client(&server)
        .chat_stream(&hello(), "ERNIE-Bot-turbo")
        .await
        .unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap().id.as_deref(), Some("1"));
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err:?}");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_streaming_embedded_error() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(sse(concat!(
            "data: {\"id\":\"1\",\"result\":\"a\"}\n\n",
            "data: {\"error_code\":336100,\"error_msg\":\"system is busy\"}\n\n",
            "data: {\"id\":\"3\"}\n\n",
        )))
        .mount(&server)
        .await;

    let mut stream = ak_client(&server)
        .chat_stream(&hello(), "ERNIE-Bot-turbo")
        .await
        .unwrap();

    assert!(stream.next().await.unwrap().is_ok());
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Api { code: 336_100, .. }), "{err:?}");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_streaming_request_rejected_with_json() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 18,
            "error_msg": "Open api qps request limit reached"
        })))
        .mount(&server)
        .await;

    let err = ak_client(&server)
        .chat_stream(&hello(), "ERNIE-Bot-turbo")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { code: 18, .. }), "{err:?}");
}

#[tokio::test]
async fn test_streaming_close_stops_reading() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(sse(concat!(
            "data: {\"id\":\"1\"}\n\n",
            "data: {\"id\":\"2\"}\n\n",
            "data: [DONE]\n\n",
        )))
        .mount(&server)
        .await;

    let mut stream = ak_client(&server)
        .chat_stream(&hello(), "ERNIE-Bot-turbo")
        .await
        .unwrap();

    assert!(stream.next().await.unwrap().is_ok());
    stream.close();
    assert!(stream.is_done());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_embedding() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(EMBEDDING_PATH))
        .and(query_param("access_token", "24.test-token"))
        .and(body_partial_json(json!({"input": ["hello", "world"], "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "as-emb",
            "object": "embedding_list",
            "created": 1_700_000_000,
            "data": [
                {"object": "embedding", "embedding": [0.5, -0.25], "index": 0},
                {"object": "embedding", "embedding": [0.125, 1.0], "index": 1}
            ],
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = ak_client(&server)
        .embedding(&EmbeddingBody::new(["hello", "world"]), "embedding-v1")
        .await
        .unwrap();
    assert_eq!(resp.data.len(), 2);
    assert_eq!(resp.data[1].index, 1);
    assert_eq!(resp.data[0].embedding, vec![0.5, -0.25]);
}

#[tokio::test]
async fn test_request_carries_client_tag() {
    let server = MockServer::start().await;
    mount_token(&server, 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("ok")))
        .mount(&server)
        .await;

    ak_client(&server)
        .chat_complete(&hello().temperature(0.5), "ERNIE-Bot-turbo")
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let chat = requests
        .iter()
        .find(|r| r.url.path() == CHAT_PATH)
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&chat.body).unwrap();
    let tag = body["extra_parameters"]["request_source"].as_str().unwrap();
    assert!(tag.starts_with("qianfan_rust_sdk_v"), "{tag}");
    assert_eq!(body["messages"][0]["content"], "Hello");
    assert_eq!(body["temperature"], 0.5);
}
