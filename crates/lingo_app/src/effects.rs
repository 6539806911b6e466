use std::sync::Arc;
use std::time::Duration;

use lingo_core::{Effect, Msg};
use lingo_engine::{
    BatchExplanationScheduler, EngineEvent, EngineHandle, ExplanationClient, RunEvent,
};
use lingo_logging::{lingo_error, lingo_info, lingo_warn};

/// Executes reader effects on the engine and turns engine events back into
/// messages.
pub(crate) struct EffectRunner {
    engine: EngineHandle,
}

impl EffectRunner {
    pub(crate) fn new(
        client: Arc<dyn ExplanationClient>,
        scheduler: BatchExplanationScheduler,
    ) -> std::io::Result<Self> {
        Ok(Self {
            engine: EngineHandle::new(client, scheduler)?,
        })
    }

    pub(crate) fn enqueue(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartBatch {
                    run,
                    document_id,
                    segments,
                } => {
                    lingo_info!(
                        "StartBatch run={} document={} segments={}",
                        run,
                        document_id,
                        segments.len()
                    );
                    self.engine.start_batch(run, document_id, segments);
                }
                Effect::ExplainSegment { run, segment } => {
                    lingo_info!("ExplainSegment run={} segment={}", run, segment.id);
                    self.engine.explain_segment(run, segment);
                }
                Effect::CancelBatch => self.engine.cancel_batch(),
                Effect::ResetChat { document_id } => {
                    // No chat session is attached while explaining.
                    lingo_info!("ResetChat document={}", document_id);
                }
            }
        }
    }

    /// Waits up to `timeout` for the next engine event.
    pub(crate) fn next_msg(&self, timeout: Duration) -> Option<Msg> {
        self.engine.recv_timeout(timeout).map(map_event)
    }
}

pub(crate) fn map_event(RunEvent { run, event }: RunEvent) -> Msg {
    match event {
        EngineEvent::JobStarted { segment_id } => Msg::JobStarted { run, segment_id },
        EngineEvent::SegmentExplained {
            segment_id,
            explanation,
        } => Msg::SegmentExplained {
            run,
            segment_id,
            explanation,
        },
        EngineEvent::JobFailed { segment_id, error } => {
            lingo_warn!("Segment {} failed: {}", segment_id, error);
            Msg::JobFailed {
                run,
                segment_id,
                message: error.to_string(),
            }
        }
        // Progress is derived from job results on the reader side.
        EngineEvent::Progress(_) => Msg::NoOp,
        EngineEvent::BatchFinished { cancelled } => Msg::BatchFinished { run, cancelled },
        EngineEvent::BatchRejected { message } => {
            lingo_error!("Batch run {} rejected: {}", run, message);
            Msg::BatchFinished {
                run,
                cancelled: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use lingo_core::Msg;
    use lingo_engine::{EngineEvent, ExplainError, ExplainFailure, RunEvent};

    use super::map_event;

    #[test]
    fn failures_carry_their_run_and_message() {
        let msg = map_event(RunEvent {
            run: 4,
            event: EngineEvent::JobFailed {
                segment_id: "a".into(),
                error: ExplainError::new(ExplainFailure::Timeout, "after 120s"),
            },
        });
        assert_eq!(
            msg,
            Msg::JobFailed {
                run: 4,
                segment_id: "a".into(),
                message: "timeout: after 120s".into(),
            }
        );
    }

    #[test]
    fn rejected_batch_ends_only_its_own_run() {
        let msg = map_event(RunEvent {
            run: 2,
            event: EngineEvent::BatchRejected {
                message: "segment a was queued twice".into(),
            },
        });
        assert_eq!(
            msg,
            Msg::BatchFinished {
                run: 2,
                cancelled: true
            }
        );
    }
}
