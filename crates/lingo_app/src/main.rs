mod app;
mod chat;
mod effects;
mod persistence;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lingo_engine::{EngineConfig, ModelConfig};
use lingo_logging::{LogDestination, DEFAULT_LOG_FILE};
use log::LevelFilter;

use crate::app::ExplainOptions;

#[derive(Parser)]
#[command(name = "lingo", version, about = "AI explanations and chat for segmented reading material")]
struct Cli {
    /// RON configuration file (default: ./lingo.ron if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of the terminal.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate and explain every segment that lacks an explanation.
    Explain {
        /// Document JSON: {id, title?, segments: [...]}.
        document: PathBuf,
        /// Number of concurrent explanation jobs.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Directory holding saved explanations.
        #[arg(long, default_value = "explanations")]
        output_dir: PathBuf,
        /// Explain this segment again even if it already has an explanation.
        #[arg(long = "regenerate", value_name = "SEGMENT_ID")]
        regenerate: Vec<String>,
    },
    /// Chat with the assistant about a document.
    Chat {
        document: PathBuf,
        /// Index of the segment the reader is on.
        #[arg(long, default_value_t = 0)]
        segment: usize,
    },
    /// Write a configuration template.
    InitConfig {
        #[arg(default_value = persistence::DEFAULT_CONFIG_FILENAME)]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    match cli.command {
        Command::Explain {
            document,
            concurrency,
            output_dir,
            regenerate,
        } => {
            let destination = cli
                .log_file
                .map(LogDestination::File)
                .unwrap_or(LogDestination::Terminal);
            lingo_logging::initialize(destination, level);
            let config = persistence::load_config(cli.config.as_deref())?;
            let document = persistence::load_document(&document)?;
            app::run_explain(
                config,
                document,
                ExplainOptions {
                    output_dir,
                    concurrency,
                    regenerate,
                },
            )
        }
        Command::Chat { document, segment } => {
            // Terminal logging would interleave with streamed replies.
            let log_file = cli.log_file.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
            lingo_logging::initialize(LogDestination::File(log_file), level);
            let config = persistence::load_config(cli.config.as_deref())?;
            let document = persistence::load_document(&document)?;
            let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
            runtime.block_on(chat::run_chat(config, document, segment))
        }
        Command::InitConfig { path } => {
            lingo_logging::initialize(LogDestination::Terminal, level);
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            persistence::save_config(&path, &config_template())
        }
    }
}

fn config_template() -> EngineConfig {
    EngineConfig {
        active_model_id: Some("default".into()),
        model_configs: vec![ModelConfig {
            id: "default".into(),
            name: "OpenAI".into(),
            api_key: String::new(),
            api_provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            is_default: true,
            base_url: None,
        }],
        ..EngineConfig::default()
    }
}
