use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use futures_util::future::join_all;
use lingo_core::{
    BatchRun, Explanation, ExplanationJob, RunId, Segment, SegmentId, SegmentPatch, SegmentStore,
};
use lingo_logging::{lingo_debug, lingo_info, lingo_warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::ExplanationClient;
use crate::config::DEFAULT_CONCURRENCY;
use crate::{BatchOutcome, EngineEvent, ExplainError, JobFailure, RunEvent, SchedulerError};

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Forwards every event of one run, stamped with its id.
pub struct ChannelProgressSink {
    run: RunId,
    tx: std::sync::mpsc::Sender<RunEvent>,
}

impl ChannelProgressSink {
    pub fn new(run: RunId, tx: std::sync::mpsc::Sender<RunEvent>) -> Self {
        Self { run, tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(RunEvent {
            run: self.run,
            event,
        });
    }
}

/// What a worker reports back. Workers never touch the store or the run.
#[derive(Debug)]
enum WorkerEvent {
    Started {
        segment_id: SegmentId,
    },
    Explained {
        segment_id: SegmentId,
        explanation: Explanation,
    },
    Failed {
        segment_id: SegmentId,
        error: ExplainError,
    },
}

/// Runs "explain all" over a fixed pool of worker loops.
#[derive(Debug, Clone)]
pub struct BatchExplanationScheduler {
    concurrency: usize,
    target_language: String,
}

impl BatchExplanationScheduler {
    pub fn new(target_language: impl Into<String>) -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            target_language: target_language.into(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Explains every segment of `segments` that has no explanation yet and
    /// merges each result into `store` once it has been persisted.
    ///
    /// Emits `JobStarted`, then `SegmentExplained` or `JobFailed`, then one
    /// `Progress` per finished job. Resolves after every worker has exited.
    pub async fn run(
        &self,
        store: SegmentStore,
        segments: &[Segment],
        client: &dyn ExplanationClient,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, SchedulerError> {
        if self.concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency);
        }
        let mut seen = HashSet::with_capacity(segments.len());
        if let Some(duplicate) = segments.iter().find(|segment| !seen.insert(&segment.id)) {
            return Err(SchedulerError::DuplicateJob(duplicate.id.clone()));
        }

        let run = BatchRun::from_segments(segments);
        lingo_info!(
            "explaining {} of {} segments with {} workers",
            run.total(),
            segments.len(),
            self.concurrency
        );
        let queue: Mutex<VecDeque<ExplanationJob>> = Mutex::new(run.jobs().iter().cloned().collect());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let workers = join_all((0..self.concurrency).map(|worker| {
            worker_loop(
                worker,
                &queue,
                client,
                &self.target_language,
                tx.clone(),
                cancel,
            )
        }));
        // The consumer's loop ends once the last worker drops its sender.
        drop(tx);

        let consumer = async move {
            let mut store = store;
            let mut run = run;
            let mut explained = Vec::new();
            let mut failures = Vec::new();
            while let Some(event) = rx.recv().await {
                match event {
                    WorkerEvent::Started { segment_id } => {
                        run.mark_running(&segment_id);
                        sink.emit(EngineEvent::JobStarted { segment_id });
                    }
                    WorkerEvent::Explained {
                        segment_id,
                        explanation,
                    } => {
                        store = store.merge(&segment_id, &SegmentPatch::from_explanation(&explanation));
                        if let Some(progress) = run.mark_finished(&segment_id, true) {
                            explained.push(segment_id.clone());
                            sink.emit(EngineEvent::SegmentExplained {
                                segment_id,
                                explanation,
                            });
                            sink.emit(EngineEvent::Progress(progress));
                        }
                    }
                    WorkerEvent::Failed { segment_id, error } => {
                        lingo_warn!("explaining segment {} failed: {}", segment_id, error);
                        if let Some(progress) = run.mark_finished(&segment_id, false) {
                            failures.push(JobFailure {
                                segment_id: segment_id.clone(),
                                error: error.clone(),
                            });
                            sink.emit(EngineEvent::JobFailed { segment_id, error });
                            sink.emit(EngineEvent::Progress(progress));
                        }
                    }
                }
            }
            (store, run, explained, failures)
        };

        let (_, (store, run, explained, failures)) = tokio::join!(workers, consumer);
        let cancelled = cancel.is_cancelled() && !run.is_finished();
        lingo_info!(
            "batch finished: {}/{} done, {} failed{}",
            explained.len(),
            run.total(),
            failures.len(),
            if cancelled { ", cancelled" } else { "" }
        );
        Ok(BatchOutcome {
            store,
            run,
            explained,
            failures,
            cancelled,
        })
    }

    /// Explains and persists one segment even when it already has an
    /// explanation. The caller merges the result.
    pub async fn explain_one(
        &self,
        segment: &Segment,
        client: &dyn ExplanationClient,
    ) -> Result<Explanation, ExplainError> {
        lingo_debug!("regenerating explanation for segment {}", segment.id);
        explain_and_persist(client, &segment.id, &segment.text, &self.target_language).await
    }
}

async fn worker_loop(
    worker: usize,
    queue: &Mutex<VecDeque<ExplanationJob>>,
    client: &dyn ExplanationClient,
    target_language: &str,
    tx: mpsc::UnboundedSender<WorkerEvent>,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            lingo_debug!("worker {} stopping: batch cancelled", worker);
            break;
        }
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(job) = next else {
            break;
        };

        let _ = tx.send(WorkerEvent::Started {
            segment_id: job.segment_id.clone(),
        });
        let event = match explain_and_persist(client, &job.segment_id, &job.text, target_language).await {
            Ok(explanation) => WorkerEvent::Explained {
                segment_id: job.segment_id,
                explanation,
            },
            Err(error) => WorkerEvent::Failed {
                segment_id: job.segment_id,
                error,
            },
        };
        let _ = tx.send(event);
    }
}

async fn explain_and_persist(
    client: &dyn ExplanationClient,
    segment_id: &str,
    text: &str,
    target_language: &str,
) -> Result<Explanation, ExplainError> {
    let explanation = client.explain(text, target_language).await?;
    client.persist(segment_id, &explanation).await?;
    Ok(explanation)
}
