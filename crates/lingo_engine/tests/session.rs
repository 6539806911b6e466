use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use lingo_core::{ActionType, MessageOutcome, Role, TurnOutcome, TurnPhase};
use lingo_engine::{
    Attachment, ChatSession, ChunkEmitter, EventBus, LocalBackend, LocalChatRequest,
    LocalTransport, RemoteSettings, SessionOptions, TransportError, TransportKind, TurnInput,
    WireContent,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(lingo_logging::initialize_for_tests);
}

/// Streams `deltas`, records every request it sees, and can then hang until
/// cancelled.
#[derive(Default)]
struct FakeBackend {
    deltas: Vec<&'static str>,
    error: Option<&'static str>,
    hang: bool,
    requests: Mutex<Vec<LocalChatRequest>>,
}

#[async_trait]
impl LocalBackend for FakeBackend {
    async fn stream_chat(
        &self,
        request: LocalChatRequest,
        emitter: ChunkEmitter,
        cancel: CancellationToken,
    ) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(request);
        let mut full = String::new();
        for delta in &self.deltas {
            emitter.emit(delta);
            full.push_str(delta);
            tokio::task::yield_now().await;
        }
        if self.hang {
            cancel.cancelled().await;
            return Ok(full);
        }
        match self.error {
            Some(message) => Err(TransportError::Backend(message.into())),
            None => Ok(full),
        }
    }
}

fn session_with(backend: Arc<FakeBackend>) -> (ChatSession, Arc<EventBus>) {
    let bus = EventBus::new();
    let local = LocalTransport::new(backend, Arc::clone(&bus));
    let session = ChatSession::with_transports("doc-1", "ja", None, Some(local));
    (session, bus)
}

#[tokio::test]
async fn chunks_merge_into_one_finished_assistant_message() {
    init_logging();
    let backend = Arc::new(FakeBackend {
        deltas: vec!["Hel", "lo"],
        ..FakeBackend::default()
    });
    let (mut session, bus) = session_with(Arc::clone(&backend));

    let outcome = session
        .send(TurnInput::new("greet me").with_selection("猫", ActionType::Explain))
        .await;

    assert_eq!(outcome, TurnOutcome::Done);
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(
        messages[0].metadata.as_ref().unwrap().selected_text.as_deref(),
        Some("猫")
    );
    assert_eq!(messages[1].content, "Hello");
    assert!(!messages[1].is_streaming);
    assert_eq!(messages[1].outcome(), Some(MessageOutcome::Done));
    assert_eq!(session.phase(), TurnPhase::Idle);
    assert_eq!(bus.channel_count(), 0);
}

#[tokio::test]
async fn later_turns_carry_the_finished_conversation() {
    init_logging();
    let backend = Arc::new(FakeBackend {
        deltas: vec!["ok"],
        ..FakeBackend::default()
    });
    let (mut session, _bus) = session_with(Arc::clone(&backend));
    session.set_reading_context(Some("猫がいる".into()), Some(0.25));

    session.send(TurnInput::new("first")).await;
    session.send(TurnInput::new("second")).await;

    let requests = backend.requests.lock().unwrap();
    let roles: Vec<&str> = requests[1]
        .messages
        .iter()
        .map(|message| message.role.as_str())
        .collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    let WireContent::Text(system) = &requests[1].messages[0].content else {
        panic!("system prompt is plain text");
    };
    assert!(system.contains("Japanese"));
    assert!(system.contains("猫がいる"));
    assert!(system.contains("25%"));
}

#[tokio::test]
async fn stop_before_any_chunk_leaves_an_empty_cancelled_message() {
    init_logging();
    let backend = Arc::new(FakeBackend {
        hang: true,
        ..FakeBackend::default()
    });
    let (mut session, bus) = session_with(backend);
    let stop = session.stop_handle();
    let mut snapshots = session.subscribe();

    let turn = tokio::spawn(async move {
        let outcome = session.send(TurnInput::new("hello?")).await;
        (session, outcome)
    });
    snapshots
        .wait_for(|snapshot| snapshot.phase != TurnPhase::Idle)
        .await
        .unwrap();

    assert!(stop.stop());
    assert!(!stop.stop(), "second stop is a no-op");

    let (session, outcome) = tokio::time::timeout(Duration::from_secs(2), turn)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Cancelled);
    let reply = session.messages().last().unwrap();
    assert_eq!(reply.content, "");
    assert!(!reply.is_streaming);
    assert_eq!(reply.outcome(), Some(MessageOutcome::Cancelled));
    assert!(!session.stop(), "idle session has nothing to stop");
    assert_eq!(bus.channel_count(), 0);
}

#[tokio::test]
async fn stop_mid_reply_is_published_before_the_turn_settles() {
    init_logging();
    let backend = Arc::new(FakeBackend {
        deltas: vec!["Hel"],
        hang: true,
        ..FakeBackend::default()
    });
    let (mut session, _bus) = session_with(backend);
    let stop = session.stop_handle();
    let mut snapshots = session.subscribe();

    let turn = tokio::spawn(async move {
        let outcome = session.send(TurnInput::new("hello?")).await;
        (session, outcome)
    });
    snapshots
        .wait_for(|snapshot| {
            snapshot
                .messages
                .last()
                .is_some_and(|message| message.content == "Hel")
        })
        .await
        .unwrap();

    assert!(stop.stop());
    // The turn task has not run since the stop; the snapshot is already final.
    let snapshot = snapshots.borrow_and_update().clone();
    let reply = snapshot.messages.last().unwrap();
    assert_eq!(reply.content, "Hel");
    assert!(!reply.is_streaming);
    assert_eq!(reply.outcome(), Some(MessageOutcome::Cancelled));
    assert_eq!(snapshot.phase, TurnPhase::Idle);

    let (session, outcome) = tokio::time::timeout(Duration::from_secs(2), turn)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(session.messages(), snapshot.messages.as_slice());
    assert_eq!(snapshots.borrow().messages, snapshot.messages);
}

#[tokio::test]
async fn transport_error_keeps_partial_output_with_marker() {
    init_logging();
    let backend = Arc::new(FakeBackend {
        deltas: vec!["Partial"],
        error: Some("rate limited"),
        ..FakeBackend::default()
    });
    let (mut session, _bus) = session_with(backend);

    let outcome = session.send(TurnInput::new("go")).await;

    assert!(matches!(outcome, TurnOutcome::Errored(_)));
    let reply = session.messages().last().unwrap();
    assert_eq!(
        reply.content,
        "Partial\n\n[error: model backend error: rate limited]"
    );
    assert!(!reply.is_streaming);
}

#[tokio::test]
async fn no_configuration_is_one_notice_and_turns_error_inline() {
    init_logging();
    let mut session = ChatSession::open(SessionOptions {
        document_id: "doc-1".into(),
        target_language: "en".into(),
        remote: None,
        local: None,
    })
    .await;

    assert_eq!(session.messages().len(), 1);
    assert_eq!(session.messages()[0].outcome(), Some(MessageOutcome::Notice));
    assert_eq!(session.select_transport(false), None);

    let outcome = session.send(TurnInput::new("anyone?")).await;
    assert!(matches!(outcome, TurnOutcome::Errored(_)));
    assert_eq!(session.messages().len(), 3);
    assert!(session.messages()[2].content.starts_with("[error: "));
}

async fn remote_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_id": "s-9" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"type\":\"content\",\"content\":\"from remote\"}\n\ndata: [DONE]\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn remote_is_used_unless_the_turn_has_an_attachment() {
    init_logging();
    let server = remote_server().await;
    let backend = Arc::new(FakeBackend {
        deltas: vec!["from local"],
        ..FakeBackend::default()
    });
    let mut session = ChatSession::open(SessionOptions {
        document_id: "doc-1".into(),
        target_language: "en".into(),
        remote: Some(RemoteSettings::new(server.uri())),
        local: Some(LocalTransport::new(backend.clone(), EventBus::new())),
    })
    .await;

    assert!(session.messages().is_empty(), "no setup notice");
    assert_eq!(session.select_transport(false), Some(TransportKind::Remote));
    assert_eq!(session.select_transport(true), Some(TransportKind::Local));

    session.send(TurnInput::new("plain")).await;
    assert_eq!(session.messages()[1].content, "from remote");

    let attachment = Attachment {
        file_name: "page.png".into(),
        mime_type: "image/png".into(),
        data: "AAAA".into(),
    };
    session
        .send(TurnInput::new("look").with_attachment(attachment))
        .await;
    assert_eq!(session.messages()[3].content, "from local");
    assert_eq!(backend.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_handshake_falls_back_to_local_with_a_notice() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let backend = Arc::new(FakeBackend {
        deltas: vec!["local reply"],
        ..FakeBackend::default()
    });

    let mut session = ChatSession::open(SessionOptions {
        document_id: "doc-1".into(),
        target_language: "en".into(),
        remote: Some(RemoteSettings::new(server.uri())),
        local: Some(LocalTransport::new(backend, EventBus::new())),
    })
    .await;

    assert_eq!(session.messages().len(), 1);
    assert_eq!(session.messages()[0].outcome(), Some(MessageOutcome::Notice));
    assert_eq!(session.select_transport(false), Some(TransportKind::Local));

    assert_eq!(session.send(TurnInput::new("hi")).await, TurnOutcome::Done);
    assert_eq!(session.messages()[2].content, "local reply");
}

#[tokio::test]
async fn switching_documents_clears_the_log() {
    init_logging();
    let backend = Arc::new(FakeBackend {
        deltas: vec!["x"],
        ..FakeBackend::default()
    });
    let (mut session, _bus) = session_with(backend);
    let snapshots = session.subscribe();
    session.send(TurnInput::new("q")).await;
    assert_eq!(snapshots.borrow().messages.len(), 2);

    session.switch_document("doc-2");

    assert_eq!(session.document_id(), "doc-2");
    assert!(session.messages().is_empty());
    assert!(snapshots.borrow().messages.is_empty());
}
