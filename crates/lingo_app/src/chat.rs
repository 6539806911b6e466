use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use lingo_core::{ActionType, MessageId, Role, TurnOutcome};
use lingo_engine::{
    ChatSession, ChatSnapshot, CompletionsApi, EngineConfig, EventBus, LocalTransport,
    SessionOptions, StopHandle, TurnInput,
};
use lingo_logging::{lingo_debug, lingo_info, lingo_warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::persistence::Document;

const HELP: &str = "Type a question and press Enter. Commands:\n  \
    /explain <text>    explain a passage\n  \
    /translate <text>  translate a passage\n  \
    /segment <n>       focus on segment n\n  \
    /quit              leave\n\
    Ctrl-C stops the reply being streamed.";

/// Interactive chat about one document on stdin/stdout.
pub(crate) async fn run_chat(config: EngineConfig, document: Document, segment: usize) -> Result<()> {
    let local = match config.active_model() {
        Some(model) => {
            let api = CompletionsApi::new(model, &config.request)?;
            lingo_info!("Local model {} at {}", api.model(), api.url());
            Some(LocalTransport::new(Arc::new(api), EventBus::new()))
        }
        None => None,
    };
    let mut session = ChatSession::open(SessionOptions {
        document_id: document.id.clone(),
        target_language: config.target_language.clone(),
        remote: config.remote.clone(),
        local,
    })
    .await;
    focus(&mut session, &document, segment);

    let quit = CancellationToken::new();
    let printer = tokio::spawn(print_replies(session.subscribe()));
    let interrupts = tokio::spawn(handle_interrupts(session.stop_handle(), quit.clone()));

    println!("{}", document.title.as_deref().unwrap_or(&document.id));
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = quit.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let input = match parse_command(line) {
            Command::Quit => break,
            Command::Help => {
                println!("{HELP}");
                continue;
            }
            Command::Focus(index) => {
                focus(&mut session, &document, index);
                continue;
            }
            Command::Send(input) => input,
        };
        if let TurnOutcome::Errored(message) = session.send(input).await {
            lingo_debug!("turn ended with error: {}", message);
        }
    }

    quit.cancel();
    interrupts.abort();
    drop(session);
    let _ = printer.await;
    Ok(())
}

enum Command {
    Quit,
    Help,
    Focus(usize),
    Send(TurnInput),
}

fn parse_command(line: &str) -> Command {
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match head {
        "/quit" | "/exit" => Command::Quit,
        "/help" => Command::Help,
        "/segment" => match rest.parse() {
            Ok(index) => Command::Focus(index),
            Err(_) => Command::Help,
        },
        "/explain" if !rest.is_empty() => Command::Send(
            TurnInput::new("Explain the selected text.").with_selection(rest, ActionType::Explain),
        ),
        "/translate" if !rest.is_empty() => Command::Send(
            TurnInput::new("Translate the selected text.")
                .with_selection(rest, ActionType::Translate),
        ),
        _ => Command::Send(TurnInput::new(line)),
    }
}

fn focus(session: &mut ChatSession, document: &Document, index: usize) {
    let Some(segment) = document.segments.get(index) else {
        lingo_warn!("segment {} is out of range", index);
        return;
    };
    let progress = (index + 1) as f32 / document.segments.len() as f32;
    session.set_reading_context(Some(segment.text.clone()), Some(progress));
    println!("Focused on segment {index}: {}", segment.text);
}

/// First Ctrl-C while a reply streams stops it; Ctrl-C while idle quits.
async fn handle_interrupts(stop: StopHandle, quit: CancellationToken) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if !stop.stop() {
            quit.cancel();
            break;
        }
        lingo_info!("Reply stopped by user");
    }
}

/// Prints assistant text as it streams in, once per appended delta.
async fn print_replies(mut snapshots: watch::Receiver<ChatSnapshot>) {
    let mut current: Option<MessageId> = None;
    let mut printed = 0;
    loop {
        {
            let snapshot = snapshots.borrow_and_update();
            for message in snapshot.messages.iter().filter(|m| m.role == Role::Assistant) {
                if current.is_some_and(|id| message.id < id) {
                    continue;
                }
                if current != Some(message.id) {
                    current = Some(message.id);
                    printed = 0;
                    print!("\nassistant> ");
                }
                let content = &message.content;
                if content.len() > printed {
                    print!("{}", &content[printed..]);
                    printed = content.len();
                }
                if !message.is_streaming && printed != usize::MAX {
                    println!();
                    printed = usize::MAX;
                }
            }
            let _ = std::io::stdout().flush();
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}
