//! Lingo core: segment model, batch and chat bookkeeping, and the pure reader
//! state machine.
mod batch;
mod chat;
mod effect;
mod msg;
mod segment;
mod state;
mod store;
mod update;
mod view_model;

pub use batch::{BatchProgress, BatchRun, ExplanationJob, JobStatus, RunId};
pub use chat::{
    error_marker, ActionType, ChatMessage, MessageId, MessageLog, MessageMetadata,
    MessageOutcome, Role, TurnOutcome, TurnPhase,
};
pub use effect::Effect;
pub use msg::Msg;
pub use segment::{Explanation, GrammarPoint, Segment, SegmentId, SegmentPatch, VocabularyItem};
pub use state::ReaderState;
pub use store::{SegmentStore, StoreError};
pub use update::update;
pub use view_model::{BatchSummary, ReaderViewModel, SegmentRowView};
