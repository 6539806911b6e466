use crate::{Explanation, RunId, Segment, SegmentId};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// A document (or a reload of the current one) finished loading.
    DocumentLoaded {
        document_id: String,
        segments: Vec<Segment>,
    },
    /// User confirmed the "explain all" dialog.
    ExplainAllConfirmed,
    /// User asked to regenerate one segment, explained or not.
    RegenerateRequested { segment_id: SegmentId },
    /// User cancelled the running batch.
    CancelBatchClicked,
    /// A worker of `run` picked up the job for a segment.
    JobStarted { run: RunId, segment_id: SegmentId },
    /// A job explained and persisted its segment.
    SegmentExplained {
        run: RunId,
        segment_id: SegmentId,
        explanation: Explanation,
    },
    /// A job failed; the segment keeps its previous state.
    JobFailed {
        run: RunId,
        segment_id: SegmentId,
        message: String,
    },
    /// Every worker of the batch exited, or the batch never started.
    BatchFinished { run: RunId, cancelled: bool },
    /// UI/render tick to coalesce rendering.
    Tick,
    /// Fallback for placeholder wiring.
    NoOp,
}
