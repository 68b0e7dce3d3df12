mod bracket;
mod completion;
mod config;
mod error;
mod progression;
mod results;
mod server;
mod service;
mod store;
mod types;
mod user_state;

pub use bracket::{build_bracket, build_bracket_with_rng, bracket_size, Bracket, Match, Slot, BYE};
pub use completion::{available_models, CompletionClient, CompletionError, ModelInfo, OpenRouterClient};
pub use config::AppConfig;
pub use error::TournamentError;
pub use progression::{MatchState, VoteOutcome};
pub use results::{Outcome, ParticipationStats, PromptRanking, ResultsSnapshot};
pub use server::{router, serve};
pub use service::TournamentService;
pub use store::{MemoryStore, TournamentStore};
pub use types::*;
pub use user_state::replay_votes;

use anyhow::{anyhow, Context};
use std::{fs, path::Path, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, load_env_file};

// ── Entry point ────────────────────────────────────────────────────────

pub fn run() -> anyhow::Result<()> {
    let env_vars = load_env_file(Path::new(".env"));
    let config = load_config().map_err(|e| anyhow!(e))?;

    fs::create_dir_all(&config.log_dir).with_context(|| format!("create log dir {}", config.log_dir))?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "prompt-arena.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    info!("Prompt arena starting");
    info!("Loaded {env_vars} variables from .env");

    let api_key = config.api_key().map_err(|e| anyhow!(e))?;
    let store = match config.data_path() {
        Some(path) => MemoryStore::open(&path).with_context(|| format!("open store {}", path.display()))?,
        None => {
            warn!("No dataPath configured; tournaments are kept in memory only");
            MemoryStore::new()
        }
    };
    let client = OpenRouterClient::new(&config, api_key).context("build OpenRouter client")?;
    let service: SharedService = Arc::new(TournamentService::new(store, client, config.max_concurrent_completions));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(serve(service, &config.listen_addr))
}
