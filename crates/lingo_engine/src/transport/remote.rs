use futures_util::StreamExt;
use lingo_logging::{lingo_debug, lingo_info, lingo_trace, lingo_warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{map_reqwest_error, TransportError, TurnRequest, TurnSink};
use crate::config::RemoteSettings;
use crate::sse::{FrameDecoder, DONE_SENTINEL};

const SESSIONS_PATH: &str = "sessions";
const STREAM_PATH: &str = "chat/stream";
const MAX_ERROR_BODY: usize = 512;

/// Assistant backend reached over HTTP; replies arrive as SSE frames.
#[derive(Debug, Clone)]
pub struct RemoteTransport {
    client: reqwest::Client,
    endpoint: Url,
    auth_token: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RemoteChatRequest<'a> {
    session_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_segment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct RemoteFrame {
    #[serde(rename = "type")]
    kind: FrameKind,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FrameKind {
    Message,
    Content,
    Done,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameAction {
    Chunk(String),
    Done,
    Error(String),
    Skip,
}

impl RemoteTransport {
    pub fn new(settings: &RemoteSettings) -> Result<Self, TransportError> {
        let endpoint = settings
            .endpoint_url()
            .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))?;
        // The overall timeout would cut long replies short; stalls are bounded
        // by the read timeout instead.
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .read_timeout(settings.request_timeout())
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            auth_token: settings.auth_token.clone(),
            session_id: None,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    /// Opens the backend session every later turn is correlated with.
    pub async fn handshake(&mut self) -> Result<&str, TransportError> {
        let url = self.url(SESSIONS_PATH)?;
        let response = self
            .authorized(self.client.post(url))
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
            .map_err(|err| TransportError::Handshake(map_reqwest_error(err).to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(TransportError::Handshake(format!("http status {}: {body}", status.as_u16())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| TransportError::Handshake(err.to_string()))?;
        let parsed: HandshakeResponse = serde_json::from_slice(&bytes)
            .map_err(|err| TransportError::Handshake(format!("invalid response: {err}")))?;

        lingo_info!("remote session {} opened", parsed.session_id);
        Ok(self.session_id.insert(parsed.session_id).as_str())
    }

    pub(crate) async fn stream(
        &self,
        request: &TurnRequest,
        sink: &TurnSink<'_>,
        cancel: &CancellationToken,
    ) {
        if let Err(err) = self.stream_inner(request, sink, cancel).await {
            lingo_warn!("remote stream failed: {}", err);
            sink.error(&err);
        }
    }

    async fn stream_inner(
        &self,
        request: &TurnRequest,
        sink: &TurnSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let session_id = self.session_id.as_deref().ok_or(TransportError::NotConnected)?;
        let body = RemoteChatRequest {
            session_id,
            message: &request.message,
            selected_text: request.selected_text.as_deref(),
            context_segment: request.context_segment.as_deref(),
            progress: request.progress,
        };
        let body = serde_json::to_vec(&body).map_err(|err| TransportError::Remote(err.to_string()))?;
        let send = self
            .authorized(self.client.post(self.url(STREAM_PATH)?))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .body(body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                lingo_debug!("remote turn cancelled before the response arrived");
                return Ok(());
            }
            response = send => response.map_err(map_reqwest_error)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let mut decoder = FrameDecoder::new();
        let mut stream = response.bytes_stream();
        loop {
            // Returning drops the body stream, which closes the connection.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    lingo_debug!("remote turn cancelled mid-stream");
                    return Ok(());
                }
                next = stream.next() => next,
            };
            let payloads = match next {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(err)) => return Err(map_reqwest_error(err)),
                None => {
                    let tail = decoder.finish().into_iter().collect::<Vec<_>>();
                    if !apply_payloads(tail, sink)? {
                        lingo_debug!("remote stream ended without a done frame");
                        sink.done();
                    }
                    return Ok(());
                }
            };
            if apply_payloads(payloads, sink)? {
                return Ok(());
            }
        }
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.endpoint
            .join(path)
            .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }
}

/// Applies decoded payloads in order. Returns true once the terminal `done`
/// frame has been forwarded; an `error` frame ends the stream as an error.
fn apply_payloads(payloads: Vec<String>, sink: &TurnSink<'_>) -> Result<bool, TransportError> {
    for payload in payloads {
        match parse_frame(&payload) {
            FrameAction::Chunk(text) => {
                lingo_trace!("remote chunk of {} bytes", text.len());
                sink.chunk(&text);
            }
            FrameAction::Done => {
                sink.done();
                return Ok(true);
            }
            FrameAction::Error(message) => return Err(TransportError::Remote(message)),
            FrameAction::Skip => {}
        }
    }
    Ok(false)
}

fn parse_frame(payload: &str) -> FrameAction {
    let payload = payload.trim();
    if payload.is_empty() {
        return FrameAction::Skip;
    }
    if payload == DONE_SENTINEL {
        return FrameAction::Done;
    }
    let frame: RemoteFrame = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(err) => {
            lingo_warn!("skipping undecodable frame: {} ({})", payload, err);
            return FrameAction::Skip;
        }
    };
    match frame.kind {
        FrameKind::Message | FrameKind::Content => {
            FrameAction::Chunk(frame.content.unwrap_or_default())
        }
        FrameKind::Done => FrameAction::Done,
        FrameKind::Error => FrameAction::Error(
            frame
                .error
                .or(frame.content)
                .unwrap_or_else(|| "remote assistant error".to_string()),
        ),
        FrameKind::Unknown => FrameAction::Skip,
    }
}

async fn error_body(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    let mut end = text.len().min(MAX_ERROR_BODY);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::{parse_frame, FrameAction};

    #[test]
    fn message_and_content_frames_are_chunks() {
        assert_eq!(
            parse_frame(r#"{"type":"message","content":"Hel"}"#),
            FrameAction::Chunk("Hel".into())
        );
        assert_eq!(
            parse_frame(r#"{"type":"content","content":"lo"}"#),
            FrameAction::Chunk("lo".into())
        );
    }

    #[test]
    fn terminal_frames() {
        assert_eq!(parse_frame(r#"{"type":"done"}"#), FrameAction::Done);
        assert_eq!(parse_frame("[DONE]"), FrameAction::Done);
        assert_eq!(
            parse_frame(r#"{"type":"error","error":"quota exceeded"}"#),
            FrameAction::Error("quota exceeded".into())
        );
    }

    #[test]
    fn unknown_and_garbage_frames_are_skipped() {
        assert_eq!(parse_frame(r#"{"type":"ping"}"#), FrameAction::Skip);
        assert_eq!(parse_frame("not json"), FrameAction::Skip);
        assert_eq!(parse_frame("  "), FrameAction::Skip);
    }
}
