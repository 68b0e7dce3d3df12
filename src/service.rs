use futures::{stream, StreamExt};
use tracing::{info, warn};

use crate::bracket::build_bracket;
use crate::completion::CompletionClient;
use crate::error::TournamentError;
use crate::results::{participation_stats, rankings, ParticipationStats, PromptRanking};
use crate::store::TournamentStore;
use crate::types::{
  Entry, PromptSubmission, Tournament, TournamentDraft, TournamentResults, TournamentSummary,
  TournamentView, UserTournament, VoteResult, MIN_PROMPTS,
};
use crate::user_state;

/// Coordinates creation, voting and results over a store and a completion
/// client. Holds no state of its own beyond its collaborators.
pub struct TournamentService<S, C> {
  store: S,
  client: C,
  max_concurrent: usize,
}

impl<S: TournamentStore, C: CompletionClient> TournamentService<S, C> {
  pub fn new(store: S, client: C, max_concurrent: usize) -> Self {
    TournamentService {
      store,
      client,
      max_concurrent: max_concurrent.max(1),
    }
  }

  /// Generates one completion per submission, then builds and stores the
  /// bracket template. Any failed completion aborts the whole creation and
  /// nothing is stored.
  pub async fn create_tournament(
    &self,
    question: &str,
    prompts: Vec<PromptSubmission>,
  ) -> Result<Tournament, TournamentError> {
    if prompts.len() < MIN_PROMPTS {
      return Err(TournamentError::InvalidInput(format!(
        "at least {MIN_PROMPTS} prompts required, got {}",
        prompts.len()
      )));
    }

    // Owned per-request values keep the creation future `Send`.
    let requests = prompts
      .iter()
      .enumerate()
      .map(|(position, prompt)| (position, prompt.text.clone(), prompt.model.clone()))
      .collect::<Vec<_>>();
    let mut responses = vec![String::new(); prompts.len()];
    let mut completions = stream::iter(requests)
      .map(move |(position, text, model)| async move {
        match self.client.complete(&text, &model, question).await {
          Ok(response) if !response.trim().is_empty() => Ok((position, response)),
          Ok(_) => Err(TournamentError::UpstreamCompletionFailure {
            position,
            model,
            reason: "empty response".to_string(),
          }),
          Err(e) => Err(TournamentError::UpstreamCompletionFailure {
            position,
            model,
            reason: e.to_string(),
          }),
        }
      })
      .buffer_unordered(self.max_concurrent);

    while let Some(result) = completions.next().await {
      let (position, response) = result.inspect_err(|e| warn!("Tournament creation aborted: {e}"))?;
      responses[position] = response;
    }
    drop(completions);

    let bracket_template = build_bracket(prompts.len())?;
    let entries = prompts
      .into_iter()
      .zip(responses)
      .enumerate()
      .map(|(position, (prompt, response))| Entry {
        position,
        text: prompt.text,
        model: prompt.model,
        response,
      })
      .collect::<Vec<_>>();

    let tournament = self.store.insert_tournament(TournamentDraft {
      question: question.to_string(),
      entries,
      bracket_template,
    })?;
    info!(
      "Created tournament {} with {} entries ({} rounds)",
      tournament.id,
      tournament.entries.len(),
      tournament.bracket_template.round_count()
    );
    Ok(tournament)
  }

  pub fn get_tournament(&self, tournament_id: u64) -> Result<Tournament, TournamentError> {
    self.store.tournament(tournament_id)
  }

  pub fn get_tournament_view(
    &self,
    tournament_id: u64,
    user_id: &str,
  ) -> Result<TournamentView, TournamentError> {
    let tournament = self.store.tournament(tournament_id)?;
    let (user_bracket, user_state) = user_state::current_bracket(&self.store, &tournament, user_id)?;
    Ok(TournamentView {
      id: tournament.id,
      prompts: tournament.entries.iter().map(|entry| entry.text.clone()).collect(),
      models: tournament.entries.iter().map(|entry| entry.model.clone()).collect(),
      responses: tournament.entries.iter().map(|entry| entry.response.clone()).collect(),
      question: tournament.question,
      bracket_template: tournament.bracket_template,
      user_bracket,
      user_state,
      created_at: tournament.created_at,
    })
  }

  pub fn get_or_create_user_tournament(
    &self,
    tournament_id: u64,
    user_id: &str,
  ) -> Result<UserTournament, TournamentError> {
    user_state::get_or_create(&self.store, tournament_id, user_id)
  }

  pub fn record_vote(
    &self,
    tournament_id: u64,
    user_id: &str,
    round: usize,
    index: usize,
    winner: usize,
  ) -> Result<VoteResult, TournamentError> {
    let result = user_state::record_vote(&self.store, tournament_id, user_id, round, index, winner)?;
    if result.completed {
      info!(
        "User {user_id} completed tournament {tournament_id} with entry {:?}",
        result.winner_prompt_index
      );
    }
    Ok(result)
  }

  pub fn get_rankings(&self, tournament_id: u64) -> Result<Vec<PromptRanking>, TournamentError> {
    let snapshot = self.store.results_snapshot(tournament_id)?;
    Ok(rankings(&snapshot))
  }

  pub fn get_participation_stats(&self, tournament_id: u64) -> Result<ParticipationStats, TournamentError> {
    let snapshot = self.store.results_snapshot(tournament_id)?;
    Ok(participation_stats(&snapshot.outcomes))
  }

  /// Rankings and stats from the same snapshot.
  pub fn get_results(&self, tournament_id: u64) -> Result<TournamentResults, TournamentError> {
    let snapshot = self.store.results_snapshot(tournament_id)?;
    Ok(TournamentResults {
      rankings: rankings(&snapshot),
      stats: participation_stats(&snapshot.outcomes),
    })
  }

  pub fn list_tournaments(&self) -> Result<Vec<TournamentSummary>, TournamentError> {
    self.store.list_tournaments()
  }

  pub fn delete_tournament(&self, tournament_id: u64) -> Result<(), TournamentError> {
    self.store.delete_tournament(tournament_id)?;
    info!("Deleted tournament {tournament_id}");
    Ok(())
  }
}
