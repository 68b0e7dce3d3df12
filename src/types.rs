use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bracket::Bracket;
use crate::completion::OpenRouterClient;
use crate::results::{ParticipationStats, PromptRanking};
use crate::service::TournamentService;
use crate::store::MemoryStore;

// ── Constants ──────────────────────────────────────────────────────────

pub const MIN_PROMPTS: usize = 2;
pub const MAX_PROMPTS: usize = 16;
pub const MAX_QUESTION_LEN: usize = 1000;
pub const MAX_PROMPT_LEN: usize = 5000;
pub const QUESTION_PREVIEW_LEN: usize = 100;
pub const DEFAULT_MAX_CONCURRENT_COMPLETIONS: usize = 10;
pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_TITLE: &str = "LLM Prompt Arena";
pub const USER_ID_HEADER: &str = "x-user-id";

// ── Shared state type aliases ──────────────────────────────────────────

pub type SharedService = Arc<TournamentService<MemoryStore, OpenRouterClient>>;

// ── Tournament records ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSubmission {
    pub text: String,
    pub model: String,
}

/// One (prompt, model, completion) triple, identified by its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub position: usize,
    pub text: String,
    pub model: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: u64,
    pub question: String,
    pub entries: Vec<Entry>,
    pub bracket_template: Bracket,
    pub created_at: DateTime<Utc>,
}

/// A tournament before the store has assigned it an id.
#[derive(Debug, Clone)]
pub struct TournamentDraft {
    pub question: String,
    pub entries: Vec<Entry>,
    pub bracket_template: Bracket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTournament {
    pub id: u64,
    pub tournament_id: u64,
    pub user_id: String,
    pub bracket: Bracket,
    pub completed: bool,
    pub winner_entry: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: u64,
    pub user_tournament_id: u64,
    pub round_number: usize,
    pub match_number: usize,
    pub winner_entry: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewVote {
    pub round_number: usize,
    pub match_number: usize,
    pub winner_entry: usize,
}

// ── Response payloads ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub completed: bool,
    pub winner_prompt_index: Option<usize>,
    pub next_match: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentView {
    pub id: u64,
    pub question: String,
    pub prompts: Vec<String>,
    pub models: Vec<String>,
    pub responses: Vec<String>,
    pub bracket_template: Bracket,
    pub user_bracket: Bracket,
    pub user_state: UserState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentSummary {
    pub id: u64,
    pub question: String,
    pub num_prompts: usize,
    pub created_at: DateTime<Utc>,
    pub total_participants: usize,
    pub completed_participants: usize,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResult {
    pub user_bracket: Bracket,
    pub completed: bool,
    pub winner_prompt_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentResults {
    pub rankings: Vec<PromptRanking>,
    pub stats: ParticipationStats,
}

pub fn question_preview(question: &str) -> String {
    if question.chars().count() > QUESTION_PREVIEW_LEN {
        let head = question.chars().take(QUESTION_PREVIEW_LEN).collect::<String>();
        format!("{head}...")
    } else {
        question.to_string()
    }
}
