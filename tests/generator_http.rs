use serde_json::{json, Value};
use std::time::Duration;
use topic_tutor::config::LlmConfig;
use topic_tutor::generator::{ExplanationGenerator, GenerationError, LlmGenerator};
use topic_tutor::models::Mode;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cfg_for(server: &MockServer) -> LlmConfig {
    LlmConfig {
        api_key: Some("test-key".into()),
        api_base: format!("{}/v1/", server.uri()),
        model: "test-model".into(),
        temperature: 0.2,
        max_tokens: 256,
        timeout: Duration::from_secs(5),
    }
}

fn completion(content: &str) -> Value {
    json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]})
}

async fn sent_messages(server: &MockServer) -> Vec<Value> {
    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    body["messages"].as_array().unwrap().clone()
}

#[tokio::test]
async fn explain_posts_two_messages_and_strips_think() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "test-model", "max_tokens": 256})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "<think>the user wants a summary</think>\nPlants convert light into sugar.",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let generator = LlmGenerator::new(cfg_for(&server)).unwrap();
    let text = generator.explain("Photosynthesis", None, Mode::Long).await.unwrap();
    assert_eq!(text, "Plants convert light into sugar.");

    let messages = sent_messages(&server).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[1]["content"], "Photosynthesis");
}

#[tokio::test]
async fn explain_mentions_parent_and_follows_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Short answer.")))
        .mount(&server)
        .await;

    let generator = LlmGenerator::new(cfg_for(&server)).unwrap();
    generator.explain("Borrowing", Some("Rust"), Mode::Short).await.unwrap();
    generator.explain("Borrowing", Some("Rust"), Mode::Long).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let short: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let long: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert!(short["messages"][1]["content"].as_str().unwrap().contains("continues the topic: Rust"));
    assert_ne!(short["messages"][0]["content"], long["messages"][0]["content"]);
}

#[tokio::test]
async fn explain_classifies_http_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let generator = LlmGenerator::new(cfg_for(&server)).unwrap();
    match generator.explain("X", None, Mode::Long).await.unwrap_err() {
        GenerationError::ServerStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(matches!(
        generator.explain("X", None, Mode::Long).await.unwrap_err(),
        GenerationError::ClientStatus { status: 401, .. }
    ));
}

#[tokio::test]
async fn explain_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("late")).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut cfg = cfg_for(&server);
    cfg.timeout = Duration::from_millis(100);
    let generator = LlmGenerator::new(cfg).unwrap();
    assert!(matches!(
        generator.explain("X", None, Mode::Long).await.unwrap_err(),
        GenerationError::Timeout
    ));
}

#[tokio::test]
async fn explain_without_key_sends_nothing() {
    let server = MockServer::start().await;
    let mut cfg = cfg_for(&server);
    cfg.api_key = None;
    let generator = LlmGenerator::new(cfg).unwrap();
    assert!(!generator.has_api_key());

    assert!(matches!(
        generator.explain("X", None, Mode::Long).await.unwrap_err(),
        GenerationError::MissingApiKey
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn explain_rejects_replies_without_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("<think>only thinking</think>")))
        .mount(&server)
        .await;

    let generator = LlmGenerator::new(cfg_for(&server)).unwrap();
    for _ in 0..2 {
        assert!(matches!(
            generator.explain("X", None, Mode::Long).await.unwrap_err(),
            GenerationError::MalformedResponse(_)
        ));
    }
}

#[tokio::test]
async fn related_parses_list_with_explanation_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "1. Chlorophyll\n2. Cellular respiration.\n- Light-dependent reactions\n",
        )))
        .mount(&server)
        .await;

    let generator = LlmGenerator::new(cfg_for(&server)).unwrap();
    let related = generator.related("Photosynthesis", Some("Plants make sugar.")).await;
    assert_eq!(related, vec!["Chlorophyll", "Cellular respiration", "Light-dependent reactions"]);

    let messages = sent_messages(&server).await;
    let user = messages[1]["content"].as_str().unwrap();
    assert!(user.contains("Photosynthesis"));
    assert!(user.contains("Plants make sugar."));
}

#[tokio::test]
async fn related_degrades_to_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let generator = LlmGenerator::new(cfg_for(&server)).unwrap();
    assert!(generator.related("X", None).await.is_empty());

    let mut cfg = cfg_for(&server);
    cfg.api_key = None;
    assert!(LlmGenerator::new(cfg).unwrap().related("X", None).await.is_empty());
}
