use crate::{RunId, Segment};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Run the batch scheduler over these segments, in this order.
    StartBatch {
        run: RunId,
        document_id: String,
        segments: Vec<Segment>,
    },
    /// Explain one segment through the regeneration path.
    ExplainSegment { run: RunId, segment: Segment },
    CancelBatch,
    /// The chat session belongs to the previous document and must be reset.
    ResetChat { document_id: String },
}
