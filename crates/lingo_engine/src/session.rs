use std::sync::{Arc, Mutex, PoisonError};

use lingo_core::{
    ActionType, ChatMessage, MessageLog, MessageMetadata, MessageOutcome, TurnOutcome, TurnPhase,
};
use lingo_logging::{lingo_debug, lingo_info, lingo_warn};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::completions::language_name;
use crate::config::RemoteSettings;
use crate::transport::{
    Attachment, ChannelStreamSink, LocalTransport, RemoteTransport, StreamEvent, StreamTransport,
    TransportKind, TurnRequest, WireMessage,
};

const NOT_CONFIGURED_NOTICE: &str =
    "No active AI configuration. Add a model configuration to start chatting.";
const NO_TRANSPORT_ERROR: &str = "no assistant backend is available";

/// What observers of a session see after every applied event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatSnapshot {
    pub messages: Vec<ChatMessage>,
    pub phase: TurnPhase,
}

/// One user message and what it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnInput {
    pub text: String,
    pub selected_text: Option<String>,
    pub action_type: Option<ActionType>,
    pub attachment: Option<Attachment>,
}

impl TurnInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selected_text: None,
            action_type: None,
            attachment: None,
        }
    }

    pub fn with_selection(mut self, selected_text: impl Into<String>, action: ActionType) -> Self {
        self.selected_text = Some(selected_text.into());
        self.action_type = Some(action);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    fn metadata(&self) -> Option<MessageMetadata> {
        if self.selected_text.is_none() && self.action_type.is_none() {
            return None;
        }
        Some(MessageMetadata {
            selected_text: self.selected_text.clone(),
            action_type: self.action_type,
            outcome: None,
        })
    }
}

/// Where the reader currently is in the document.
#[derive(Debug, Clone, PartialEq, Default)]
struct ReadingContext {
    segment_text: Option<String>,
    progress: Option<f32>,
}

/// How a session reaches the assistant.
pub struct SessionOptions {
    pub document_id: String,
    pub target_language: String,
    pub remote: Option<RemoteSettings>,
    pub local: Option<LocalTransport>,
}

/// Cancels whatever turn is in flight on its session.
#[derive(Debug, Clone)]
pub struct StopHandle {
    active: Arc<Mutex<Option<CancellationToken>>>,
    snapshots: Arc<watch::Sender<ChatSnapshot>>,
}

impl StopHandle {
    /// Returns false when no turn was in flight.
    ///
    /// Observers see the reply stop streaming before this returns; the turn's
    /// own `send` settles the log to the same state once it is next polled.
    pub fn stop(&self) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(token) = active.take() else {
            return false;
        };
        token.cancel();
        self.snapshots.send_modify(|snapshot| {
            if let Some(reply) = snapshot.messages.last_mut() {
                reply.settle(MessageOutcome::Cancelled, None);
            }
            snapshot.phase = TurnPhase::Idle;
        });
        true
    }
}

/// Chat about one document.
///
/// `send` takes `&mut self`, so a session drives at most one turn at a time.
/// Stopping a turn from elsewhere goes through a [`StopHandle`].
pub struct ChatSession {
    document_id: String,
    target_language: String,
    log: MessageLog,
    phase: TurnPhase,
    remote: Option<RemoteTransport>,
    local: Option<LocalTransport>,
    context: ReadingContext,
    root: CancellationToken,
    active: Arc<Mutex<Option<CancellationToken>>>,
    snapshots: Arc<watch::Sender<ChatSnapshot>>,
}

impl ChatSession {
    /// Opens a session, handshaking with the remote backend when one is
    /// configured. Setup problems become a single notice in the log.
    pub async fn open(options: SessionOptions) -> Self {
        let mut notices = Vec::new();
        let remote = match &options.remote {
            Some(settings) => match connect(settings).await {
                Ok(remote) => Some(remote),
                Err(notice) => {
                    notices.push(notice);
                    None
                }
            },
            None => None,
        };
        if remote.is_none() && options.local.is_none() && notices.is_empty() {
            notices.push(NOT_CONFIGURED_NOTICE.to_string());
        }

        let mut session = Self::with_transports(
            options.document_id,
            options.target_language,
            remote,
            options.local,
        );
        for notice in notices {
            session.log.push_notice(notice);
        }
        session.publish();
        session
    }

    /// A session over already-prepared transports; `remote` is only used once
    /// its handshake has succeeded.
    pub fn with_transports(
        document_id: impl Into<String>,
        target_language: impl Into<String>,
        remote: Option<RemoteTransport>,
        local: Option<LocalTransport>,
    ) -> Self {
        let (snapshots, _) = watch::channel(ChatSnapshot::default());
        Self {
            document_id: document_id.into(),
            target_language: target_language.into(),
            log: MessageLog::new(),
            phase: TurnPhase::Idle,
            remote,
            local,
            context: ReadingContext::default(),
            root: CancellationToken::new(),
            active: Arc::new(Mutex::new(None)),
            snapshots: Arc::new(snapshots),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.log.messages()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            active: Arc::clone(&self.active),
            snapshots: Arc::clone(&self.snapshots),
        }
    }

    /// Cancels the active turn. No-op when idle.
    pub fn stop(&self) -> bool {
        self.stop_handle().stop()
    }

    pub fn set_reading_context(&mut self, segment_text: Option<String>, progress: Option<f32>) {
        self.context = ReadingContext {
            segment_text,
            progress: progress.map(|progress| progress.clamp(0.0, 1.0)),
        };
    }

    /// Which transport a turn would use right now.
    pub fn select_transport(&self, has_attachment: bool) -> Option<TransportKind> {
        let remote_ready = self.remote.as_ref().is_some_and(RemoteTransport::is_connected);
        TransportKind::select(remote_ready, self.local.is_some(), has_attachment)
    }

    /// Moves the session to another document, abandoning any turn and the
    /// transcript of the previous one.
    pub fn switch_document(&mut self, document_id: impl Into<String>) {
        self.stop();
        self.document_id = document_id.into();
        self.log.clear();
        self.context = ReadingContext::default();
        self.phase = TurnPhase::Idle;
        lingo_info!("chat session moved to document {}", self.document_id);
        self.publish();
    }

    /// Runs one turn to completion, cancellation, or error.
    pub async fn send(&mut self, input: TurnInput) -> TurnOutcome {
        let request = self.build_request(&input);
        let metadata = input.metadata();
        self.log.push_user(input.text, metadata);
        self.log.open_assistant();
        self.phase = TurnPhase::Sending;

        let transport = match self.select_transport(request.attachment.is_some()) {
            Some(TransportKind::Remote) => self.remote.clone().map(StreamTransport::Remote),
            Some(TransportKind::Local) => self.local.clone().map(StreamTransport::Local),
            None => None,
        };
        let Some(transport) = transport else {
            lingo_warn!("turn on {} has no usable transport", self.document_id);
            return self.settle(TurnOutcome::Errored(NO_TRANSPORT_ERROR.to_string()));
        };
        lingo_debug!("turn on {} uses {:?} transport", self.document_id, transport.kind());

        let cancel = self.root.child_token();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        self.publish_live();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelStreamSink::new(tx);
        let outcome = {
            let drive = transport.start(&request, &sink, &cancel);
            tokio::pin!(drive);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break TurnOutcome::Cancelled,
                    Some(event) = rx.recv() => {
                        if let Some(outcome) = self.apply(event) {
                            break outcome;
                        }
                    }
                    _ = &mut drive => {
                        // Everything the transport emitted is already queued.
                        let mut outcome = None;
                        while let Ok(event) = rx.try_recv() {
                            outcome = self.apply(event);
                            if outcome.is_some() {
                                break;
                            }
                        }
                        break outcome.unwrap_or_else(|| {
                            if cancel.is_cancelled() {
                                TurnOutcome::Cancelled
                            } else {
                                TurnOutcome::Errored("stream ended without a result".to_string())
                            }
                        });
                    }
                }
            }
        };
        self.settle(outcome)
    }

    /// Applies one transport event. Returns the outcome once the turn is over.
    fn apply(&mut self, event: StreamEvent) -> Option<TurnOutcome> {
        match event {
            StreamEvent::Chunk(text) => {
                if self.log.append_chunk(&text) {
                    self.phase = TurnPhase::Streaming;
                    self.publish_live();
                }
                None
            }
            StreamEvent::Done => Some(TurnOutcome::Done),
            StreamEvent::Error(message) => Some(TurnOutcome::Errored(message)),
        }
    }

    fn settle(&mut self, outcome: TurnOutcome) -> TurnOutcome {
        match &outcome {
            TurnOutcome::Done => self.log.finish(),
            TurnOutcome::Errored(message) => {
                lingo_warn!("turn on {} failed: {}", self.document_id, message);
                self.log.fail(message)
            }
            TurnOutcome::Cancelled => {
                lingo_debug!("turn on {} stopped", self.document_id);
                self.log.cancel()
            }
        };
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.phase = TurnPhase::Idle;
        self.publish();
        outcome
    }

    fn build_request(&self, input: &TurnInput) -> TurnRequest {
        let history = self
            .log
            .conversation()
            .map(|message| WireMessage::text(message.role.as_str(), message.content.clone()))
            .collect();
        TurnRequest {
            message: input.text.clone(),
            selected_text: input.selected_text.clone(),
            action_type: input.action_type,
            context_segment: self.context.segment_text.clone(),
            progress: self.context.progress,
            system_prompt: Some(self.system_prompt()),
            history,
            attachment: input.attachment.clone(),
        }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are a language-learning assistant helping a reader understand a text. \
             Answer in {}.",
            language_name(&self.target_language)
        );
        if let Some(segment) = &self.context.segment_text {
            prompt.push_str("\n\nThe reader is currently on this passage:\n");
            prompt.push_str(segment);
        }
        if let Some(progress) = self.context.progress {
            prompt.push_str(&format!("\n\nReading progress: {:.0}%", progress * 100.0));
        }
        prompt
    }

    /// Publishes mid-turn state unless the turn has been stopped, so a stop
    /// already shown to observers is never undone.
    fn publish_live(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|token| !token.is_cancelled()) {
            self.publish();
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(ChatSnapshot {
            messages: self.log.messages().to_vec(),
            phase: self.phase,
        });
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn connect(settings: &RemoteSettings) -> Result<RemoteTransport, String> {
    let mut remote = RemoteTransport::new(settings).map_err(|err| {
        lingo_warn!("remote assistant misconfigured: {}", err);
        format!("Could not reach the assistant service: {err}")
    })?;
    if let Err(err) = remote.handshake().await {
        lingo_warn!("remote handshake with {} failed: {}", settings.endpoint, err);
        return Err(format!("Could not reach the assistant service: {err}"));
    }
    Ok(remote)
}
