//! HTTP provider tests against a mock server.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use facade_rag::completion::{ChatCompletionsProvider, CompletionProvider};
use facade_rag::config::{CompletionConfig, EmbeddingConfig};
use facade_rag::embedding::{Embedder, OllamaEmbedder, OpenAIEmbedder};
use facade_rag::error::ProviderError;

fn completion_config(url: &str, max_retries: u32) -> CompletionConfig {
    CompletionConfig {
        provider: "openai".to_string(),
        model: Some("test-model".to_string()),
        url: Some(format!("{}/v1", url)),
        max_retries,
        ..Default::default()
    }
}

fn embedding_config(provider: &str, url: String) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: provider.to_string(),
        model: Some("test-embed".to_string()),
        dims: Some(2),
        url: Some(url),
        max_retries: 1,
        ..Default::default()
    }
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    })
}

#[tokio::test]
async fn test_chat_completion_sends_system_and_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "messages": [
                { "role": "system", "content": "classify" },
                { "role": "user", "content": "Which panels face north?" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("filter_panels")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = ChatCompletionsProvider::new(&completion_config(&server.uri(), 0)).unwrap();
    let reply = provider
        .complete("classify", "Which panels face north?")
        .await
        .unwrap();
    assert_eq!(reply, "filter_panels");
}

#[tokio::test]
async fn test_chat_completion_client_error_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = ChatCompletionsProvider::new(&completion_config(&server.uri(), 3)).unwrap();
    let err = provider.complete("", "hello").await.unwrap_err();
    match err {
        ProviderError::Http { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad model");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_chat_completion_retries_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = ChatCompletionsProvider::new(&completion_config(&server.uri(), 1)).unwrap();
    assert_eq!(provider.complete("", "hello").await.unwrap(), "recovered");
}

#[tokio::test]
async fn test_chat_completion_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let provider = ChatCompletionsProvider::new(&completion_config(&server.uri(), 0)).unwrap();
    let err = provider.complete("", "hello").await.unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)));
}

#[tokio::test]
async fn test_openai_embeddings_ordered_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({ "model": "test-embed", "input": ["north", "south"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::new(&embedding_config("openai", format!("{}/v1", server.uri()))).unwrap();
    let vectors = embedder
        .embed(&["north".to_string(), "south".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn test_ollama_embed_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.5, 0.25]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&embedding_config("ollama", server.uri())).unwrap();
    let vectors = embedder.embed(&["glazing".to_string()]).await.unwrap();
    assert_eq!(vectors, vec![vec![0.5, 0.25]]);
}

#[tokio::test]
async fn test_embedding_client_error_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&embedding_config("ollama", server.uri())).unwrap();
    let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, ProviderError::Http { status: 404, .. }));
}
