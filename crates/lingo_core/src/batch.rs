use crate::{Segment, SegmentId};

/// Identifies one batch or regeneration request issued by the reader. Results
/// tagged with a run the reader no longer owns are dropped.
pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// One unit of batch work: explaining one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplanationJob {
    pub segment_id: SegmentId,
    pub text: String,
    pub status: JobStatus,
}

impl ExplanationJob {
    pub fn for_segment(segment: &Segment) -> Self {
        Self {
            segment_id: segment.id.clone(),
            text: segment.text.clone(),
            status: JobStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Book-keeping for one "explain all" run.
///
/// Only the single consumer of worker events mutates a run, so the
/// completed counter needs no synchronisation of its own.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchRun {
    jobs: Vec<ExplanationJob>,
    completed: usize,
}

impl BatchRun {
    /// One pending job per segment lacking an explanation, in input order.
    pub fn from_segments<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> Self {
        let jobs = segments
            .into_iter()
            .filter(|segment| !segment.has_explanation())
            .map(ExplanationJob::for_segment)
            .collect();
        Self { jobs, completed: 0 }
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            completed: self.completed,
            total: self.total(),
        }
    }

    pub fn jobs(&self) -> &[ExplanationJob] {
        &self.jobs
    }

    pub fn job(&self, segment_id: &str) -> Option<&ExplanationJob> {
        self.jobs.iter().find(|job| job.segment_id == segment_id)
    }

    pub fn status(&self, segment_id: &str) -> Option<JobStatus> {
        self.job(segment_id).map(|job| job.status)
    }

    /// `Pending -> Running`. Returns false for unknown or already-started jobs.
    pub fn mark_running(&mut self, segment_id: &str) -> bool {
        match self.job_mut(segment_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Moves a job to `Done` or `Failed` and bumps the completed counter.
    ///
    /// A job reaches a terminal state once; repeated reports are ignored so the
    /// counter stays monotonic and never exceeds the total.
    pub fn mark_finished(&mut self, segment_id: &str, succeeded: bool) -> Option<BatchProgress> {
        let job = self.job_mut(segment_id)?;
        if job.status.is_terminal() {
            return None;
        }
        job.status = if succeeded {
            JobStatus::Done
        } else {
            JobStatus::Failed
        };
        self.completed += 1;
        Some(self.progress())
    }

    pub fn is_finished(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_terminal())
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status == status).count()
    }

    fn job_mut(&mut self, segment_id: &str) -> Option<&mut ExplanationJob> {
        self.jobs.iter_mut().find(|job| job.segment_id == segment_id)
    }
}
