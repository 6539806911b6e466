use crate::{BatchProgress, JobStatus, SegmentId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReaderViewModel {
    pub document_id: Option<String>,
    pub segments: Vec<SegmentRowView>,
    pub batch_progress: Option<BatchProgress>,
    pub cancel_requested: bool,
    pub last_batch: Option<BatchSummary>,
    /// Segments still lacking an explanation; job failures surface here.
    pub missing_explanations: usize,
    pub load_error: Option<String>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRowView {
    pub segment_id: SegmentId,
    pub order: i32,
    pub text: String,
    pub translation: Option<String>,
    pub reading_text: Option<String>,
    pub has_explanation: bool,
    pub job_status: Option<JobStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub explained: usize,
    pub failed: usize,
    /// Jobs never finished because the run was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
}
