use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lingo_logging::{lingo_debug, lingo_trace, lingo_warn};
use tokio_util::sync::CancellationToken;

use super::{LocalChatRequest, TransportError, TurnRequest, TurnSink};
use crate::event_bus::EventBus;

const STREAM_CHANNEL_PREFIX: &str = "chat-stream://";

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique id correlating one local turn with its event channel.
pub fn next_correlation_id() -> String {
    let n = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{}-{n}", std::process::id())
}

/// Publishes raw text deltas on one turn's event channel.
#[derive(Debug, Clone)]
pub struct ChunkEmitter {
    bus: Arc<EventBus>,
    channel: String,
}

impl ChunkEmitter {
    pub fn new(bus: Arc<EventBus>, channel: impl Into<String>) -> Self {
        Self {
            bus,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn emit(&self, delta: &str) {
        if self.bus.emit(&self.channel, delta) == 0 {
            lingo_trace!("delta on {} dropped: no listener", self.channel);
        }
    }
}

/// Long-running model call that pushes deltas through an emitter and returns
/// the full reply.
#[async_trait]
pub trait LocalBackend: Send + Sync {
    async fn stream_chat(
        &self,
        request: LocalChatRequest,
        emitter: ChunkEmitter,
        cancel: CancellationToken,
    ) -> Result<String, TransportError>;
}

/// Runs the model in-process and listens on a per-turn event channel.
#[derive(Clone)]
pub struct LocalTransport {
    backend: Arc<dyn LocalBackend>,
    bus: Arc<EventBus>,
}

impl LocalTransport {
    pub fn new(backend: Arc<dyn LocalBackend>, bus: Arc<EventBus>) -> Self {
        Self { backend, bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub(crate) async fn stream(
        &self,
        request: &TurnRequest,
        sink: &TurnSink<'_>,
        cancel: &CancellationToken,
    ) {
        let channel = format!("{STREAM_CHANNEL_PREFIX}{}", next_correlation_id());
        // Subscribe before the call starts so no early delta is lost. The guard
        // unsubscribes on every return path below.
        let mut subscription = self.bus.subscribe(channel.clone());
        let emitter = ChunkEmitter::new(Arc::clone(&self.bus), channel);
        let call = self
            .backend
            .stream_chat(request.to_local(), emitter, cancel.child_token());
        tokio::pin!(call);

        let mut buffer = String::new();
        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Dropping `call` stops the in-process model as well.
                    lingo_debug!("local turn on {} cancelled", subscription.name());
                    return;
                }
                Some(delta) = subscription.recv() => {
                    buffer.push_str(&delta);
                    sink.chunk(&delta);
                }
                result = &mut call => break result,
            }
        };

        // Deltas emitted right before the call returned are still queued.
        while let Some(delta) = subscription.try_recv() {
            buffer.push_str(&delta);
            sink.chunk(&delta);
        }

        match result {
            Ok(full) => {
                match full.strip_prefix(buffer.as_str()) {
                    Some(tail) => sink.chunk(tail),
                    None => lingo_warn!(
                        "local reply ({} bytes) diverges from streamed deltas ({} bytes)",
                        full.len(),
                        buffer.len()
                    ),
                }
                sink.done();
            }
            Err(err) => {
                lingo_warn!("local turn failed: {}", err);
                sink.error(&err);
            }
        }
    }
}
