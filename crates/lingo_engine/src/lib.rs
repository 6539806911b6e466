//! Lingo engine: explanation batches, chat transports, and the IO around them.
mod client;
mod completions;
mod config;
mod engine;
mod event_bus;
mod persist;
mod scheduler;
mod session;
mod sse;
mod transport;
mod types;

pub use client::{CompletionsClient, ExplanationClient};
pub use completions::CompletionsApi;
pub use config::{
    BatchSettings, ConfigError, EngineConfig, ModelConfig, RemoteSettings, RequestSettings,
    DEFAULT_CONCURRENCY,
};
pub use engine::EngineHandle;
pub use event_bus::{EventBus, Subscription};
pub use persist::{
    ensure_output_dir, AtomicFileWriter, FileSegmentPersister, PersistError, SegmentPersister,
};
pub use scheduler::{BatchExplanationScheduler, ChannelProgressSink, ProgressSink};
pub use session::{ChatSession, ChatSnapshot, SessionOptions, StopHandle, TurnInput};
pub use transport::{
    next_correlation_id, Attachment, ChannelStreamSink, ChunkEmitter, ContentPart, FileData,
    ImageUrl, LocalBackend, LocalChatRequest, LocalTransport, RemoteTransport, StreamEvent,
    StreamSink, StreamTransport, TransportError, TransportKind, TurnRequest, WireContent,
    WireMessage,
};
pub use types::{
    BatchOutcome, EngineEvent, ExplainError, ExplainFailure, JobFailure, RunEvent,
    SchedulerError,
};
