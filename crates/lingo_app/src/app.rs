use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lingo_core::{update, BatchProgress, Msg, ReaderState, ReaderViewModel};
use lingo_engine::{
    BatchExplanationScheduler, CompletionsApi, CompletionsClient, EngineConfig,
    FileSegmentPersister,
};
use lingo_logging::{lingo_info, lingo_warn};

use crate::effects::EffectRunner;
use crate::persistence::Document;

const POLL_INTERVAL: Duration = Duration::from_millis(75);

pub(crate) struct ExplainOptions {
    pub output_dir: PathBuf,
    pub concurrency: Option<usize>,
    /// Segments to explain again even though they already have an explanation.
    pub regenerate: Vec<String>,
}

/// Runs "explain all" (plus any requested regenerations) over one document
/// until every job has finished or the run is cancelled with Ctrl-C.
pub(crate) fn run_explain(
    config: EngineConfig,
    mut document: Document,
    options: ExplainOptions,
) -> Result<()> {
    let model = config
        .active_model()
        .ok_or_else(|| anyhow!("no model configured; add one to model_configs"))?;
    let api = CompletionsApi::new(model, &config.request)?;

    let helper = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting helper runtime")?;
    let persister = FileSegmentPersister::open(options.output_dir.clone(), &document.id)?;
    let restored = helper.block_on(persister.restore(&mut document.segments));
    if restored > 0 {
        println!("Restored {restored} saved explanations");
    }

    let concurrency = options.concurrency.unwrap_or(config.batch.concurrency);
    let scheduler =
        BatchExplanationScheduler::new(config.target_language.clone()).with_concurrency(concurrency);
    let runner = EffectRunner::new(Arc::new(CompletionsClient::new(api, persister)), scheduler)
        .context("starting engine")?;

    let (msg_tx, msg_rx) = mpsc::channel::<Msg>();
    spawn_interrupt_listener(helper, msg_tx)?;

    let mut state = ReaderState::new();
    let dispatch = |state: ReaderState, msg: Msg| {
        let (state, effects) = update(state, msg);
        runner.enqueue(effects);
        state
    };

    state = dispatch(
        state,
        Msg::DocumentLoaded {
            document_id: document.id.clone(),
            segments: document.segments,
        },
    );
    if let Some(error) = state.view().load_error {
        return Err(anyhow!("document {} is invalid: {error}", document.id));
    }
    for segment_id in &options.regenerate {
        if state.store().get(segment_id).is_none() {
            lingo_warn!("Cannot regenerate unknown segment {}", segment_id);
            continue;
        }
        state = dispatch(
            state,
            Msg::RegenerateRequested {
                segment_id: segment_id.clone(),
            },
        );
    }
    state = dispatch(state, Msg::ExplainAllConfirmed);

    let mut printer = ProgressPrinter::default();
    loop {
        while let Ok(msg) = msg_rx.try_recv() {
            state = dispatch(state, msg);
        }
        let msg = runner.next_msg(POLL_INTERVAL).unwrap_or(Msg::Tick);
        state = dispatch(state, msg);

        if state.consume_dirty() {
            printer.render(&state.view());
        }
        let regenerating = options
            .regenerate
            .iter()
            .any(|segment_id| state.is_regenerating(segment_id));
        if !state.is_batch_running() && !regenerating {
            break;
        }
    }

    let view = state.view();
    printer.finish(&view);
    lingo_info!(
        "Explain run for {} finished; {} segments still missing explanations",
        document.id,
        view.missing_explanations
    );
    Ok(())
}

fn spawn_interrupt_listener(
    runtime: tokio::runtime::Runtime,
    msg_tx: mpsc::Sender<Msg>,
) -> Result<()> {
    thread::Builder::new()
        .name("lingo-interrupt".into())
        .spawn(move || {
            runtime.block_on(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    lingo_info!("Interrupt received; cancelling batch");
                    if msg_tx.send(Msg::CancelBatchClicked).is_err() {
                        break;
                    }
                }
            });
        })
        .context("spawning interrupt listener")?;
    Ok(())
}

#[derive(Default)]
struct ProgressPrinter {
    last: Option<BatchProgress>,
}

impl ProgressPrinter {
    fn render(&mut self, view: &ReaderViewModel) {
        let Some(progress) = view.batch_progress else {
            return;
        };
        if self.last == Some(progress) {
            return;
        }
        self.last = Some(progress);
        let suffix = if view.cancel_requested {
            " (cancelling)"
        } else {
            ""
        };
        println!(
            "[{}/{}] segments explained{suffix}",
            progress.completed, progress.total
        );
    }

    fn finish(&self, view: &ReaderViewModel) {
        if let Some(summary) = &view.last_batch {
            println!(
                "Batch {}: {} explained, {} failed, {} skipped of {}",
                if summary.cancelled { "cancelled" } else { "done" },
                summary.explained,
                summary.failed,
                summary.skipped,
                summary.total
            );
        }
        for row in &view.segments {
            match &row.translation {
                Some(translation) => println!("{:>4}  {}\n      {}", row.order, row.text, translation),
                None => println!("{:>4}  {}\n      (no explanation)", row.order, row.text),
            }
        }
        if view.missing_explanations > 0 {
            println!(
                "{} segments still lack an explanation; run again to retry them",
                view.missing_explanations
            );
        }
    }
}
