use lingo_logging::{lingo_debug, lingo_warn};

use crate::{Effect, Msg, ReaderState};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: ReaderState, msg: Msg) -> (ReaderState, Vec<Effect>) {
    let effects = match msg {
        Msg::DocumentLoaded {
            document_id,
            segments,
        } => {
            let batch_was_running = state.is_batch_running();
            let previous = state.load_document(document_id.clone(), segments);
            let mut effects = Vec::new();
            if batch_was_running {
                effects.push(Effect::CancelBatch);
            }
            if previous.is_some() {
                effects.push(Effect::ResetChat { document_id });
            }
            effects
        }
        Msg::ExplainAllConfirmed => {
            let Some(document_id) = state.document_id().map(ToOwned::to_owned) else {
                return (state, Vec::new());
            };
            match state.start_batch() {
                Some((run, segments)) => vec![Effect::StartBatch {
                    run,
                    document_id,
                    segments,
                }],
                None => {
                    lingo_debug!("explain all ignored: batch running or nothing pending");
                    Vec::new()
                }
            }
        }
        Msg::RegenerateRequested { segment_id } => match state.begin_regeneration(&segment_id) {
            Some((run, segment)) => vec![Effect::ExplainSegment { run, segment }],
            None => Vec::new(),
        },
        Msg::CancelBatchClicked => {
            if state.request_cancel() {
                vec![Effect::CancelBatch]
            } else {
                Vec::new()
            }
        }
        Msg::JobStarted { run, segment_id } => {
            if !state.apply_started(run, &segment_id) {
                lingo_debug!("start of segment {} from stale run {} dropped", segment_id, run);
            }
            Vec::new()
        }
        Msg::SegmentExplained {
            run,
            segment_id,
            explanation,
        } => {
            if !state.apply_explained(run, &segment_id, &explanation) {
                lingo_debug!("result for segment {} from stale run {} dropped", segment_id, run);
            }
            Vec::new()
        }
        Msg::JobFailed {
            run,
            segment_id,
            message,
        } => {
            if state.apply_failed(run, &segment_id) {
                lingo_warn!("explanation for segment {} failed: {}", segment_id, message);
            } else {
                lingo_debug!("failure of segment {} from stale run {} dropped", segment_id, run);
            }
            Vec::new()
        }
        Msg::BatchFinished { run, cancelled } => {
            if !state.finish_batch(run, cancelled) {
                lingo_debug!("end of stale batch run {} dropped", run);
            }
            Vec::new()
        }
        Msg::Tick | Msg::NoOp => Vec::new(),
    };

    (state, effects)
}
