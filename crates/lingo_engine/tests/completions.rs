use std::sync::{Arc, Once};

use lingo_engine::{
    ChannelStreamSink, CompletionsApi, EventBus, ExplainFailure, LocalTransport, ModelConfig,
    RequestSettings, StreamEvent, StreamTransport, TurnRequest,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(lingo_logging::initialize_for_tests);
}

fn api_for(server: &MockServer, api_key: &str) -> CompletionsApi {
    let config = ModelConfig {
        id: "local".into(),
        name: "Local".into(),
        api_key: api_key.into(),
        api_provider: "openai-compatible".into(),
        model: "test-model".into(),
        is_default: true,
        base_url: Some(format!("{}/v1/", server.uri())),
    };
    CompletionsApi::new(&config, &RequestSettings::default()).unwrap()
}

#[tokio::test]
async fn explain_segment_decodes_fenced_json_reply() {
    init_logging();
    let server = MockServer::start().await;
    let reply = "```json\n{\"translation\":\"There is a cat.\",\"explanation\":\"**猫** means cat\",\
                 \"vocabulary\":[{\"word\":\"猫\",\"reading\":\"ねこ\",\"meaning\":\"cat\"}],\
                 \"difficulty_level\":\"beginner\"}\n```";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": reply } }]
        })))
        .mount(&server)
        .await;

    let api = api_for(&server, "sk-test");
    assert_eq!(api.url(), format!("{}/v1/chat/completions", server.uri()));
    let explanation = api.explain_segment("猫がいる", "en").await.unwrap();

    assert_eq!(explanation.translation, "There is a cat.");
    assert_eq!(explanation.vocabulary.len(), 1);
    assert_eq!(explanation.vocabulary[0].reading.as_deref(), Some("ねこ"));
    assert_eq!(explanation.difficulty_level.as_deref(), Some("beginner"));
}

#[tokio::test]
async fn explain_failures_carry_their_kind() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "I cannot help with that." } }]
        })))
        .mount(&server)
        .await;

    let api = api_for(&server, "");
    let err = api.explain_segment("x", "en").await.unwrap_err();
    assert_eq!(err.kind, ExplainFailure::HttpStatus(429));
    assert_eq!(err.message, "slow down");

    let err = api.explain_segment("x", "en").await.unwrap_err();
    assert_eq!(err.kind, ExplainFailure::InvalidResponse);
}

#[tokio::test]
async fn streaming_reply_flows_through_the_local_transport() {
    init_logging();
    let server = MockServer::start().await;
    let body = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        "data: [DONE]",
    ]
    .map(|line| format!("{line}\n\n"))
    .concat();
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let bus = EventBus::new();
    let transport = StreamTransport::Local(LocalTransport::new(
        Arc::new(api_for(&server, "")),
        Arc::clone(&bus),
    ));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = ChannelStreamSink::new(tx);
    let request = TurnRequest {
        message: "hi".into(),
        ..TurnRequest::default()
    };

    transport
        .start(&request, &sink, &CancellationToken::new())
        .await;
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            StreamEvent::Chunk("Hel".into()),
            StreamEvent::Chunk("lo".into()),
            StreamEvent::Done,
        ]
    );
    assert_eq!(bus.channel_count(), 0);
}
