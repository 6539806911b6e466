use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lingo_core::{BatchProgress, Explanation, RunId, Segment};
use lingo_engine::{
    BatchExplanationScheduler, EngineEvent, EngineHandle, ExplainError, ExplanationClient,
    RunEvent,
};

struct EchoClient;

#[async_trait]
impl ExplanationClient for EchoClient {
    async fn explain(&self, text: &str, target_language: &str) -> Result<Explanation, ExplainError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Explanation::with_translation(format!("{text} ({target_language})")))
    }

    async fn persist(&self, _segment_id: &str, _explanation: &Explanation) -> Result<(), ExplainError> {
        Ok(())
    }
}

fn collect_until_finished(engine: &EngineHandle, run: RunId) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Some(report) = engine.recv_timeout(Duration::from_secs(5)) {
        let finished = report.run == run
            && matches!(
                report.event,
                EngineEvent::BatchFinished { .. } | EngineEvent::BatchRejected { .. }
            );
        events.push(report);
        if finished {
            break;
        }
    }
    events
}

fn segments(prefix: &str, count: i32) -> Vec<Segment> {
    (0..count)
        .map(|i| Segment::new(format!("{prefix}{i}"), i, format!("text {i}")))
        .collect()
}

#[test]
fn batch_runs_on_the_background_runtime() {
    let engine = EngineHandle::new(
        Arc::new(EchoClient),
        BatchExplanationScheduler::new("en").with_concurrency(2),
    )
    .unwrap();

    engine.start_batch(1, "doc-1", segments("s", 3));
    let events = collect_until_finished(&engine, 1);

    assert!(events.iter().all(|report| report.run == 1));
    assert_eq!(
        events.last().map(|report| &report.event),
        Some(&EngineEvent::BatchFinished { cancelled: false })
    );
    let explained = events
        .iter()
        .filter(|report| matches!(report.event, EngineEvent::SegmentExplained { .. }))
        .count();
    assert_eq!(explained, 3);
    assert!(events.iter().any(|report| report.event
        == EngineEvent::Progress(BatchProgress {
            completed: 3,
            total: 3
        })));
}

#[test]
fn new_batch_supersedes_the_active_one_after_it_drains() {
    let engine = EngineHandle::new(Arc::new(EchoClient), BatchExplanationScheduler::new("en"))
        .unwrap();

    engine.start_batch(1, "doc-1", segments("old", 9));
    engine.start_batch(2, "doc-2", segments("new", 2));
    let events = collect_until_finished(&engine, 2);

    assert!(!events
        .iter()
        .any(|report| matches!(report.event, EngineEvent::BatchRejected { .. })));
    let old_finished = events
        .iter()
        .position(|report| {
            report.run == 1 && matches!(report.event, EngineEvent::BatchFinished { .. })
        })
        .expect("superseded batch reports its end");
    assert_eq!(
        events[old_finished].event,
        EngineEvent::BatchFinished { cancelled: true }
    );
    let first_new = events.iter().position(|report| report.run == 2).unwrap();
    assert!(old_finished < first_new, "old batch drains before the new one starts");

    let new_explained = events
        .iter()
        .filter(|report| {
            report.run == 2 && matches!(report.event, EngineEvent::SegmentExplained { .. })
        })
        .count();
    assert_eq!(new_explained, 2);
    assert_eq!(
        events.last().map(|report| &report.event),
        Some(&EngineEvent::BatchFinished { cancelled: false })
    );
}

#[test]
fn regeneration_reports_the_new_explanation() {
    let engine = EngineHandle::new(Arc::new(EchoClient), BatchExplanationScheduler::new("ja"))
        .unwrap();
    let mut segment = Segment::new("a", 0, "cat");
    segment.explanation = Some(Explanation::with_translation("old"));

    engine.explain_segment(7, segment);

    let mut seen = Vec::new();
    while let Some(report) = engine.recv_timeout(Duration::from_secs(5)) {
        let done = matches!(report.event, EngineEvent::SegmentExplained { .. });
        seen.push(report);
        if done {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            RunEvent {
                run: 7,
                event: EngineEvent::JobStarted {
                    segment_id: "a".into()
                },
            },
            RunEvent {
                run: 7,
                event: EngineEvent::SegmentExplained {
                    segment_id: "a".into(),
                    explanation: Explanation::with_translation("cat (ja)"),
                },
            },
        ]
    );
}
