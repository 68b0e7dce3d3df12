use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashSet, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::bracket::Bracket;
use crate::completion::{available_models, is_known_model, CompletionClient};
use crate::error::TournamentError;
use crate::service::TournamentService;
use crate::store::TournamentStore;
use crate::types::{
    PromptSubmission, MAX_PROMPTS, MAX_PROMPT_LEN, MAX_QUESTION_LEN, MIN_PROMPTS,
    USER_ID_HEADER,
};

// ── Request and response bodies ────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTournamentRequest {
    pub question: String,
    pub prompts: Vec<PromptSubmission>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VoteRequest {
    pub round: usize,
    #[serde(rename = "match")]
    pub match_number: usize,
    pub winner: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub user_bracket: Bracket,
    pub completed: bool,
    pub winner_prompt_index: Option<usize>,
    pub user_id: String,
}

// ── Error translation ──────────────────────────────────────────────────

pub struct ApiError(TournamentError);

impl From<TournamentError> for ApiError {
    fn from(err: TournamentError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(TournamentError::InvalidInput(rejection.body_text()))
    }
}

pub fn status_for(err: &TournamentError) -> StatusCode {
    match err {
        TournamentError::NotFound(_) => StatusCode::NOT_FOUND,
        TournamentError::UpstreamCompletionFailure { .. } => StatusCode::BAD_GATEWAY,
        TournamentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        err if err.is_caller_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed with {status}: {}", self.0);
        } else {
            warn!("Request rejected with {status}: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ── Validation ─────────────────────────────────────────────────────────

/// Trims and checks a creation request before any completion is requested.
pub fn validate_create_request(
    request: CreateTournamentRequest,
) -> Result<(String, Vec<PromptSubmission>), TournamentError> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(TournamentError::InvalidInput("question must not be empty".to_string()));
    }
    if question.chars().count() > MAX_QUESTION_LEN {
        return Err(TournamentError::InvalidInput(format!(
            "question must be at most {MAX_QUESTION_LEN} characters"
        )));
    }
    if !(MIN_PROMPTS..=MAX_PROMPTS).contains(&request.prompts.len()) {
        return Err(TournamentError::InvalidInput(format!(
            "between {MIN_PROMPTS} and {MAX_PROMPTS} prompts required, got {}",
            request.prompts.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut prompts = Vec::with_capacity(request.prompts.len());
    for (i, prompt) in request.prompts.into_iter().enumerate() {
        let text = prompt.text.trim().to_string();
        let model = prompt.model.trim().to_string();
        if text.is_empty() {
            return Err(TournamentError::InvalidInput(format!("prompt {} is empty", i + 1)));
        }
        if text.chars().count() > MAX_PROMPT_LEN {
            return Err(TournamentError::InvalidInput(format!(
                "prompt {} must be at most {MAX_PROMPT_LEN} characters",
                i + 1
            )));
        }
        if !is_known_model(&model) {
            return Err(TournamentError::InvalidInput(format!(
                "model '{model}' for prompt {} is not available",
                i + 1
            )));
        }
        if !seen.insert((text.clone(), model.clone())) {
            return Err(TournamentError::InvalidInput(format!(
                "prompt {} duplicates an earlier prompt and model pair",
                i + 1
            )));
        }
        prompts.push(PromptSubmission { text, model });
    }
    Ok((question, prompts))
}

/// Caller identity from the `x-user-id` header, or a fresh opaque id.
pub fn user_id_from(headers: &HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:032x}", rand::random::<u128>()))
}

fn with_user_header(user_id: &str, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    if let Ok(value) = HeaderValue::from_str(user_id) {
        response.headers_mut().insert(USER_ID_HEADER, value);
    }
    response
}

// ── Handlers ───────────────────────────────────────────────────────────

type Shared<S, C> = Arc<TournamentService<S, C>>;

async fn list_models() -> impl IntoResponse {
    Json(available_models())
}

async fn list_tournaments<S, C>(State(service): State<Shared<S, C>>) -> Result<Response, ApiError>
where
    S: TournamentStore + 'static,
    C: CompletionClient + 'static,
{
    Ok(Json(service.list_tournaments()?).into_response())
}

async fn create_tournament<S, C>(
    State(service): State<Shared<S, C>>,
    headers: HeaderMap,
    payload: Result<Json<CreateTournamentRequest>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: TournamentStore + 'static,
    C: CompletionClient + 'static,
{
    let Json(request) = payload?;
    let (question, prompts) = validate_create_request(request)?;
    let user_id = user_id_from(&headers);
    let tournament = service.create_tournament(&question, prompts).await?;
    let view = service.get_tournament_view(tournament.id, &user_id)?;
    Ok(with_user_header(&user_id, (StatusCode::CREATED, Json(view))))
}

async fn get_tournament<S, C>(
    State(service): State<Shared<S, C>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    S: TournamentStore + 'static,
    C: CompletionClient + 'static,
{
    let user_id = user_id_from(&headers);
    let view = service.get_tournament_view(id, &user_id)?;
    Ok(with_user_header(&user_id, Json(view)))
}

async fn delete_tournament<S, C>(
    State(service): State<Shared<S, C>>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError>
where
    S: TournamentStore + 'static,
    C: CompletionClient + 'static,
{
    service.delete_tournament(id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn vote<S, C>(
    State(service): State<Shared<S, C>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: TournamentStore + 'static,
    C: CompletionClient + 'static,
{
    let Json(request) = payload?;
    let user_id = user_id_from(&headers);
    let result = service.record_vote(id, &user_id, request.round, request.match_number, request.winner)?;
    let body = VoteResponse {
        user_bracket: result.user_bracket,
        completed: result.completed,
        winner_prompt_index: result.winner_prompt_index,
        user_id: user_id.clone(),
    };
    Ok(with_user_header(&user_id, Json(body)))
}

async fn get_results<S, C>(
    State(service): State<Shared<S, C>>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError>
where
    S: TournamentStore + 'static,
    C: CompletionClient + 'static,
{
    Ok(Json(service.get_results(id)?).into_response())
}

// ── Router and listener ────────────────────────────────────────────────

pub fn router<S, C>(service: Shared<S, C>) -> Router
where
    S: TournamentStore + 'static,
    C: CompletionClient + 'static,
{
    Router::new()
        .route("/api/models", get(list_models))
        .route(
            "/api/tournaments",
            get(list_tournaments::<S, C>).post(create_tournament::<S, C>),
        )
        .route(
            "/api/tournaments/:id",
            get(get_tournament::<S, C>).delete(delete_tournament::<S, C>),
        )
        .route("/api/tournaments/:id/vote", post(vote::<S, C>))
        .route("/api/tournaments/:id/results", get(get_results::<S, C>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

pub async fn serve<S, C>(service: Shared<S, C>, addr: &str) -> anyhow::Result<()>
where
    S: TournamentStore + 'static,
    C: CompletionClient + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("Prompt arena API listening at http://{addr}/");
    axum::serve(listener, router(service))
        .await
        .context("API server error")?;
    Ok(())
}
