use std::io;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use lingo_core::{RunId, Segment, SegmentStore};
use lingo_logging::{lingo_debug, lingo_warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ExplanationClient;
use crate::scheduler::{BatchExplanationScheduler, ChannelProgressSink, ProgressSink};
use crate::{EngineEvent, RunEvent};

enum EngineCommand {
    StartBatch {
        run: RunId,
        document_id: String,
        segments: Vec<Segment>,
    },
    ExplainSegment {
        run: RunId,
        segment: Segment,
    },
    CancelBatch,
}

/// Runs batch and regeneration jobs on a background tokio runtime.
///
/// Every event is tagged with the run id given when the work was requested.
/// At most one batch runs at a time: starting a batch cancels the active one,
/// and the new batch begins once the old one has drained.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<RunEvent>,
}

struct ActiveBatch {
    run: RunId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct BatchJob {
    run: RunId,
    document_id: String,
    segments: Vec<Segment>,
    cancel: CancellationToken,
    /// Superseded batch that must drain before this one starts.
    previous: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn new(
        client: Arc<dyn ExplanationClient>,
        scheduler: BatchExplanationScheduler,
    ) -> io::Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let runtime = tokio::runtime::Runtime::new()?;

        thread::Builder::new()
            .name("lingo-engine".into())
            .spawn(move || {
                let mut active: Option<ActiveBatch> = None;
                while let Ok(command) = cmd_rx.recv() {
                    match command {
                        EngineCommand::StartBatch {
                            run,
                            document_id,
                            segments,
                        } => {
                            let previous = active.take().map(|batch| {
                                if !batch.task.is_finished() {
                                    lingo_debug!("run {} superseded by run {}", batch.run, run);
                                    batch.cancel.cancel();
                                }
                                batch.task
                            });
                            let cancel = CancellationToken::new();
                            let task = runtime.spawn(run_batch(
                                client.clone(),
                                scheduler.clone(),
                                BatchJob {
                                    run,
                                    document_id,
                                    segments,
                                    cancel: cancel.clone(),
                                    previous,
                                },
                                event_tx.clone(),
                            ));
                            active = Some(ActiveBatch { run, cancel, task });
                        }
                        EngineCommand::ExplainSegment { run, segment } => {
                            runtime.spawn(explain_segment(
                                client.clone(),
                                scheduler.clone(),
                                run,
                                segment,
                                event_tx.clone(),
                            ));
                        }
                        EngineCommand::CancelBatch => {
                            if let Some(batch) = &active {
                                lingo_debug!("cancelling batch run {}", batch.run);
                                batch.cancel.cancel();
                            }
                        }
                    }
                }
                if let Some(batch) = active {
                    batch.cancel.cancel();
                }
            })?;

        Ok(Self { cmd_tx, event_rx })
    }

    pub fn start_batch(&self, run: RunId, document_id: impl Into<String>, segments: Vec<Segment>) {
        let _ = self.cmd_tx.send(EngineCommand::StartBatch {
            run,
            document_id: document_id.into(),
            segments,
        });
    }

    pub fn explain_segment(&self, run: RunId, segment: Segment) {
        let _ = self.cmd_tx.send(EngineCommand::ExplainSegment { run, segment });
    }

    /// Cancels the most recently started batch.
    pub fn cancel_batch(&self) {
        let _ = self.cmd_tx.send(EngineCommand::CancelBatch);
    }

    pub fn try_recv(&self) -> Option<RunEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<RunEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}

async fn run_batch(
    client: Arc<dyn ExplanationClient>,
    scheduler: BatchExplanationScheduler,
    job: BatchJob,
    event_tx: mpsc::Sender<RunEvent>,
) {
    let BatchJob {
        run,
        document_id,
        segments,
        cancel,
        previous,
    } = job;
    if let Some(previous) = previous {
        if let Err(err) = previous.await {
            lingo_warn!("superseded batch task ended abnormally: {}", err);
        }
    }

    let sink = ChannelProgressSink::new(run, event_tx);
    let store = match SegmentStore::new(segments.clone()) {
        Ok(store) => store,
        Err(err) => {
            sink.emit(EngineEvent::BatchRejected {
                message: err.to_string(),
            });
            return;
        }
    };
    match scheduler
        .run(store, &segments, client.as_ref(), &sink, &cancel)
        .await
    {
        Ok(outcome) => {
            lingo_debug!(
                "batch run {} for {} done: {} explained, {} failed",
                run,
                document_id,
                outcome.explained.len(),
                outcome.failures.len()
            );
            sink.emit(EngineEvent::BatchFinished {
                cancelled: outcome.cancelled,
            });
        }
        Err(err) => {
            lingo_warn!("batch run {} for {} rejected: {}", run, document_id, err);
            sink.emit(EngineEvent::BatchRejected {
                message: err.to_string(),
            });
        }
    }
}

async fn explain_segment(
    client: Arc<dyn ExplanationClient>,
    scheduler: BatchExplanationScheduler,
    run: RunId,
    segment: Segment,
    event_tx: mpsc::Sender<RunEvent>,
) {
    let sink = ChannelProgressSink::new(run, event_tx);
    let segment_id = segment.id.clone();
    sink.emit(EngineEvent::JobStarted {
        segment_id: segment_id.clone(),
    });
    match scheduler.explain_one(&segment, client.as_ref()).await {
        Ok(explanation) => sink.emit(EngineEvent::SegmentExplained {
            segment_id,
            explanation,
        }),
        Err(error) => {
            lingo_warn!("regenerating segment {} failed: {}", segment_id, error);
            sink.emit(EngineEvent::JobFailed { segment_id, error });
        }
    }
}
