//! Streaming transports for assistant turns.
//!
//! A turn is driven by exactly one [`StreamTransport`], chosen once before the
//! turn starts. Both variants report through a [`StreamSink`]: zero or more
//! [`StreamEvent::Chunk`]s followed by a single `Done` or `Error`, and nothing
//! at all once the turn's cancellation token has fired.
mod local;
mod remote;

use lingo_core::{ActionType, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use local::{next_correlation_id, ChunkEmitter, LocalBackend, LocalTransport};
pub use remote::RemoteTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(String),
}

pub trait StreamSink: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

pub struct ChannelStreamSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelStreamSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }
}

impl StreamSink for ChannelStreamSink {
    fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }
}

/// Drops every event once the turn is cancelled.
pub(crate) struct TurnSink<'a> {
    sink: &'a dyn StreamSink,
    cancel: &'a CancellationToken,
}

impl<'a> TurnSink<'a> {
    pub(crate) fn new(sink: &'a dyn StreamSink, cancel: &'a CancellationToken) -> Self {
        Self { sink, cancel }
    }

    pub(crate) fn chunk(&self, text: &str) {
        if !text.is_empty() {
            self.emit(StreamEvent::Chunk(text.to_string()));
        }
    }

    pub(crate) fn done(&self) {
        self.emit(StreamEvent::Done);
    }

    pub(crate) fn error(&self, err: &TransportError) {
        self.emit(StreamEvent::Error(err.to_string()));
    }

    fn emit(&self, event: StreamEvent) {
        if !self.cancel.is_cancelled() {
            self.sink.emit(event);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("session handshake failed: {0}")]
    Handshake(String),
    #[error("no remote session; handshake has not succeeded")]
    NotConnected,
    #[error("{0}")]
    Remote(String),
    #[error("model backend error: {0}")]
    Backend(String),
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    TransportError::Network(err.to_string())
}

/// File attached to a turn; only the local transport can carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    /// Base64-encoded file content.
    pub data: String,
}

/// Everything a transport needs to produce one assistant reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnRequest {
    pub message: String,
    pub selected_text: Option<String>,
    pub action_type: Option<ActionType>,
    /// Text of the segment the reader is currently on.
    pub context_segment: Option<String>,
    /// Reading progress through the document, 0.0 to 1.0.
    pub progress: Option<f32>,
    pub system_prompt: Option<String>,
    /// Finished exchanges before this turn, oldest first.
    pub history: Vec<WireMessage>,
    pub attachment: Option<Attachment>,
}

impl TurnRequest {
    /// Provider-facing conversation: system prompt, history, then this turn's
    /// user message with the selection and any attachment inlined.
    pub fn to_local(&self) -> LocalChatRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            messages.push(WireMessage::text("system", prompt.clone()));
        }
        messages.extend(self.history.iter().cloned());

        let mut text = self.message.clone();
        if let Some(selected) = &self.selected_text {
            text.push_str("\n\nSelected text:\n");
            text.push_str(selected);
        }
        let content = match &self.attachment {
            None => WireContent::Text(text),
            Some(attachment) => WireContent::Parts(vec![
                ContentPart::text(text),
                ContentPart::attachment(attachment),
            ]),
        };
        messages.push(WireMessage {
            role: Role::User.as_str().to_string(),
            content,
        });

        LocalChatRequest {
            messages,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalChatRequest {
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: WireContent,
}

impl WireMessage {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: WireContent::Text(content.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            part_type: "text".into(),
            text: Some(text.into()),
            image_url: None,
            file_data: None,
        }
    }

    pub fn attachment(attachment: &Attachment) -> Self {
        if attachment.mime_type.starts_with("image/") {
            Self {
                part_type: "image_url".into(),
                text: None,
                image_url: Some(ImageUrl {
                    url: format!("data:{};base64,{}", attachment.mime_type, attachment.data),
                }),
                file_data: None,
            }
        } else {
            Self {
                part_type: "file".into(),
                text: None,
                image_url: None,
                file_data: Some(FileData {
                    mime_type: attachment.mime_type.clone(),
                    data: attachment.data.clone(),
                }),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Remote,
    Local,
}

impl TransportKind {
    /// Remote only when a handshaken remote session exists and the turn has no
    /// attachment; otherwise local, if a local backend is available.
    pub fn select(remote_ready: bool, local_available: bool, has_attachment: bool) -> Option<Self> {
        if remote_ready && !has_attachment {
            Some(TransportKind::Remote)
        } else if local_available {
            Some(TransportKind::Local)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub enum StreamTransport {
    Remote(RemoteTransport),
    Local(LocalTransport),
}

impl StreamTransport {
    pub fn kind(&self) -> TransportKind {
        match self {
            StreamTransport::Remote(_) => TransportKind::Remote,
            StreamTransport::Local(_) => TransportKind::Local,
        }
    }

    /// Drives one turn to its terminal event, or until `cancel` fires.
    pub async fn start(
        &self,
        request: &TurnRequest,
        sink: &dyn StreamSink,
        cancel: &CancellationToken,
    ) {
        let sink = TurnSink::new(sink, cancel);
        match self {
            StreamTransport::Remote(remote) => remote.stream(request, &sink, cancel).await,
            StreamTransport::Local(local) => local.stream(request, &sink, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Attachment, TransportKind, TurnRequest, WireContent, WireMessage};

    #[test]
    fn remote_needs_session_and_no_attachment() {
        assert_eq!(TransportKind::select(true, true, false), Some(TransportKind::Remote));
        assert_eq!(TransportKind::select(true, true, true), Some(TransportKind::Local));
        assert_eq!(TransportKind::select(false, true, false), Some(TransportKind::Local));
        assert_eq!(TransportKind::select(true, false, true), None);
        assert_eq!(TransportKind::select(false, false, false), None);
    }

    #[test]
    fn local_request_inlines_selection_and_attachment() {
        let request = TurnRequest {
            message: "What does this mean?".into(),
            selected_text: Some("猫".into()),
            system_prompt: Some("be brief".into()),
            history: vec![WireMessage::text("user", "hi"), WireMessage::text("assistant", "hello")],
            attachment: Some(Attachment {
                file_name: "page.png".into(),
                mime_type: "image/png".into(),
                data: "AAAA".into(),
            }),
            ..TurnRequest::default()
        };

        let local = request.to_local();
        assert_eq!(local.messages.len(), 4);
        assert_eq!(local.messages[0].role, "system");
        let WireContent::Parts(parts) = &local.messages[3].content else {
            panic!("expected multipart content");
        };
        assert_eq!(
            parts[0].text.as_deref(),
            Some("What does this mean?\n\nSelected text:\n猫")
        );
        assert_eq!(
            parts[1].image_url.as_ref().unwrap().url,
            "data:image/png;base64,AAAA"
        );
    }
}
