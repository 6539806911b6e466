use serde::{Deserialize, Serialize};

use lingo_logging::lingo_warn;

pub type MessageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// What the user asked the assistant to do with a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Explain,
    Translate,
    Analyze,
    Ask,
}

/// How an assistant message stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    Done,
    Errored,
    Cancelled,
    /// Session-level notice, never part of a turn.
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub selected_text: Option<String>,
    pub action_type: Option<ActionType>,
    pub outcome: Option<MessageOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    pub fn outcome(&self) -> Option<MessageOutcome> {
        self.metadata.as_ref().and_then(|meta| meta.outcome)
    }

    /// Freezes a streaming message with `outcome`, appending an inline error
    /// marker after any partial output. Returns false when it was not streaming.
    pub fn settle(&mut self, outcome: MessageOutcome, error: Option<&str>) -> bool {
        if !self.is_streaming {
            return false;
        }
        if let Some(error) = error {
            if !self.content.is_empty() {
                self.content.push_str("\n\n");
            }
            self.content.push_str(&error_marker(error));
        }
        self.is_streaming = false;
        self.metadata
            .get_or_insert_with(MessageMetadata::default)
            .outcome = Some(outcome);
        true
    }
}

/// Lifecycle of the turn currently owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
}

/// Terminal state of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Done,
    Errored(String),
    Cancelled,
}

/// Append-only chat transcript.
///
/// Only the last message can be mutated, and only while it is a streaming
/// assistant message; at most one message streams at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    next_id: MessageId,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn streaming(&self) -> Option<&ChatMessage> {
        self.messages.last().filter(|message| message.is_streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming().is_some()
    }

    pub fn push_user(&mut self, text: impl Into<String>, metadata: Option<MessageMetadata>) -> MessageId {
        self.close_dangling();
        self.push(Role::User, text.into(), false, metadata)
    }

    /// Opens the empty streaming placeholder for the assistant's reply.
    pub fn open_assistant(&mut self) -> MessageId {
        self.close_dangling();
        self.push(Role::Assistant, String::new(), true, None)
    }

    /// Terminal assistant message outside any turn (setup failures).
    pub fn push_notice(&mut self, text: impl Into<String>) -> MessageId {
        self.close_dangling();
        let metadata = MessageMetadata {
            outcome: Some(MessageOutcome::Notice),
            ..MessageMetadata::default()
        };
        self.push(Role::Assistant, text.into(), false, Some(metadata))
    }

    /// Appends a delta to the streaming message. Returns false, leaving the log
    /// untouched, when nothing is streaming.
    pub fn append_chunk(&mut self, delta: &str) -> bool {
        match self.streaming_mut() {
            Some(message) => {
                message.content.push_str(delta);
                true
            }
            None => false,
        }
    }

    pub fn finish(&mut self) -> bool {
        self.settle(MessageOutcome::Done, None)
    }

    /// Ends streaming with an inline error marker after any partial output.
    pub fn fail(&mut self, error: &str) -> bool {
        self.settle(MessageOutcome::Errored, Some(error))
    }

    pub fn cancel(&mut self) -> bool {
        self.settle(MessageOutcome::Cancelled, None)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Finished user/assistant exchanges, without notices, failed or
    /// cancelled replies, or the open placeholder.
    pub fn conversation(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|message| {
            !message.is_streaming
                && !message.content.is_empty()
                && matches!(message.outcome(), None | Some(MessageOutcome::Done))
        })
    }

    fn push(
        &mut self,
        role: Role,
        content: String,
        is_streaming: bool,
        metadata: Option<MessageMetadata>,
    ) -> MessageId {
        self.next_id += 1;
        let id = self.next_id;
        self.messages.push(ChatMessage {
            id,
            role,
            content,
            is_streaming,
            metadata,
        });
        id
    }

    fn streaming_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages.last_mut().filter(|message| message.is_streaming)
    }

    fn settle(&mut self, outcome: MessageOutcome, error: Option<&str>) -> bool {
        self.streaming_mut()
            .is_some_and(|message| message.settle(outcome, error))
    }

    fn close_dangling(&mut self) {
        if self.is_streaming() {
            lingo_warn!("closing a streaming message left open by an unsettled turn");
            self.cancel();
        }
    }
}

pub fn error_marker(error: &str) -> String {
    format!("[error: {error}]")
}
