use std::collections::BTreeMap;

use crate::view_model::{BatchSummary, ReaderViewModel, SegmentRowView};
use crate::{
    BatchRun, Explanation, JobStatus, RunId, Segment, SegmentId, SegmentPatch, SegmentStore,
};

/// Reader-side model for one open document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReaderState {
    document_id: Option<String>,
    store: SegmentStore,
    batch: Option<(RunId, BatchRun)>,
    cancel_requested: bool,
    last_batch: Option<BatchSummary>,
    regenerating: BTreeMap<SegmentId, RunId>,
    /// Last run id handed out; never reset, so runs of an earlier document
    /// can't be mistaken for current ones.
    last_run: RunId,
    load_error: Option<String>,
    dirty: bool,
}

impl ReaderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn batch(&self) -> Option<&BatchRun> {
        self.batch.as_ref().map(|(_, batch)| batch)
    }

    /// Run id of the batch in progress.
    pub fn batch_run(&self) -> Option<RunId> {
        self.batch.as_ref().map(|(run, _)| *run)
    }

    pub fn is_batch_running(&self) -> bool {
        self.batch.is_some()
    }

    pub fn is_regenerating(&self, segment_id: &str) -> bool {
        self.regenerating.contains_key(segment_id)
    }

    pub fn view(&self) -> ReaderViewModel {
        let segments = self
            .store
            .iter()
            .map(|segment| SegmentRowView {
                segment_id: segment.id.clone(),
                order: segment.order,
                text: segment.text.clone(),
                translation: segment.translation.clone(),
                reading_text: segment.reading_text.clone(),
                has_explanation: segment.has_explanation(),
                job_status: self
                    .batch()
                    .and_then(|batch| batch.status(&segment.id))
                    .or_else(|| {
                        self.regenerating
                            .contains_key(&segment.id)
                            .then_some(JobStatus::Running)
                    }),
            })
            .collect();

        ReaderViewModel {
            document_id: self.document_id.clone(),
            segments,
            batch_progress: self.batch().map(BatchRun::progress),
            cancel_requested: self.cancel_requested,
            last_batch: self.last_batch.clone(),
            missing_explanations: self.store.missing_explanation_count(),
            load_error: self.load_error.clone(),
            dirty: self.dirty,
        }
    }

    /// Returns whether the state changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Replaces the document. Returns the id of the previous document when it
    /// differs from the new one.
    pub(crate) fn load_document(
        &mut self,
        document_id: String,
        segments: Vec<Segment>,
    ) -> Option<String> {
        let previous = self.document_id.replace(document_id.clone());
        self.batch = None;
        self.cancel_requested = false;
        self.last_batch = None;
        self.regenerating.clear();
        match SegmentStore::new(segments) {
            Ok(store) => {
                self.store = store;
                self.load_error = None;
            }
            Err(err) => {
                self.store = SegmentStore::default();
                self.load_error = Some(err.to_string());
            }
        }
        self.mark_dirty();
        previous.filter(|previous| *previous != document_id)
    }

    /// Creates the run for every segment lacking an explanation. Returns the
    /// run id and the segments to hand to the scheduler, or `None` when there
    /// is nothing to do.
    pub(crate) fn start_batch(&mut self) -> Option<(RunId, Vec<Segment>)> {
        if self.batch.is_some() {
            return None;
        }
        let pending: Vec<Segment> = self
            .store
            .pending_explanation()
            .into_iter()
            .filter(|segment| !self.regenerating.contains_key(&segment.id))
            .collect();
        if pending.is_empty() {
            return None;
        }
        let run = self.next_run();
        self.batch = Some((run, BatchRun::from_segments(&pending)));
        self.cancel_requested = false;
        self.last_batch = None;
        self.mark_dirty();
        Some((run, pending))
    }

    pub(crate) fn request_cancel(&mut self) -> bool {
        if self.batch.is_none() || self.cancel_requested {
            return false;
        }
        self.cancel_requested = true;
        self.mark_dirty();
        true
    }

    pub(crate) fn begin_regeneration(&mut self, segment_id: &str) -> Option<(RunId, Segment)> {
        let segment = Segment::clone(self.store.get(segment_id)?);
        let in_batch = self
            .batch()
            .and_then(|batch| batch.status(segment_id))
            .is_some_and(|status| !status.is_terminal());
        if in_batch || self.regenerating.contains_key(segment_id) {
            return None;
        }
        let run = self.next_run();
        self.regenerating.insert(segment.id.clone(), run);
        self.mark_dirty();
        Some((run, segment))
    }

    pub(crate) fn apply_started(&mut self, run: RunId, segment_id: &str) -> bool {
        if !self.owns(run, segment_id) {
            return false;
        }
        if let Some((_, batch)) = self.batch.as_mut().filter(|(current, _)| *current == run) {
            if batch.mark_running(segment_id) {
                self.dirty = true;
            }
        }
        true
    }

    /// Merges a result of a run this state still owns. Returns false, leaving
    /// the state untouched, for results of abandoned runs.
    pub(crate) fn apply_explained(
        &mut self,
        run: RunId,
        segment_id: &str,
        explanation: &Explanation,
    ) -> bool {
        if !self.owns(run, segment_id) {
            return false;
        }
        let patch = SegmentPatch::from_explanation(explanation);
        self.store = self.store.merge(segment_id, &patch);
        self.finish_job(run, segment_id, true);
        self.mark_dirty();
        true
    }

    pub(crate) fn apply_failed(&mut self, run: RunId, segment_id: &str) -> bool {
        if !self.owns(run, segment_id) {
            return false;
        }
        self.finish_job(run, segment_id, false);
        self.mark_dirty();
        true
    }

    pub(crate) fn finish_batch(&mut self, run: RunId, cancelled: bool) -> bool {
        if self.batch_run() != Some(run) {
            return false;
        }
        let Some((_, batch)) = self.batch.take() else {
            return false;
        };
        self.last_batch = Some(BatchSummary {
            total: batch.total(),
            explained: batch.count(JobStatus::Done),
            failed: batch.count(JobStatus::Failed),
            skipped: batch.count(JobStatus::Pending) + batch.count(JobStatus::Running),
            cancelled,
        });
        self.cancel_requested = false;
        self.mark_dirty();
        true
    }

    fn next_run(&mut self) -> RunId {
        self.last_run += 1;
        self.last_run
    }

    /// Whether `run` is the current batch and covers `segment_id`, or is the
    /// regeneration in flight for it.
    fn owns(&self, run: RunId, segment_id: &str) -> bool {
        if self.regenerating.get(segment_id) == Some(&run) {
            return true;
        }
        self.batch
            .as_ref()
            .is_some_and(|(current, batch)| *current == run && batch.job(segment_id).is_some())
    }

    fn finish_job(&mut self, run: RunId, segment_id: &str, succeeded: bool) {
        if self.regenerating.get(segment_id) == Some(&run) {
            self.regenerating.remove(segment_id);
            return;
        }
        if let Some((_, batch)) = self.batch.as_mut() {
            batch.mark_finished(segment_id, succeeded);
        }
    }
}
