use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
  collections::{BTreeMap, HashMap},
  fs,
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard},
};
use tracing::{debug, info, warn};

use crate::error::TournamentError;
use crate::results::{participation_stats, Outcome, ResultsSnapshot};
use crate::types::{
  question_preview, NewVote, Tournament, TournamentDraft, TournamentSummary, UserTournament, Vote,
};

/// Storage collaborator for tournaments, per-user runs and votes.
///
/// `commit_vote` must be atomic per `(tournament, user)`: the bracket update
/// and the vote row land together or not at all, and concurrent commits for
/// the same user observe each other.
pub trait TournamentStore: Send + Sync {
  fn insert_tournament(&self, draft: TournamentDraft) -> Result<Tournament, TournamentError>;

  fn tournament(&self, id: u64) -> Result<Tournament, TournamentError>;

  fn list_tournaments(&self) -> Result<Vec<TournamentSummary>, TournamentError>;

  /// Removes a tournament along with its user runs and their votes.
  fn delete_tournament(&self, id: u64) -> Result<(), TournamentError>;

  fn find_user_tournament(
    &self,
    tournament_id: u64,
    user_id: &str,
  ) -> Result<Option<UserTournament>, TournamentError>;

  /// First write wins; later calls return the existing record.
  fn get_or_create_user_tournament(
    &self,
    tournament_id: u64,
    user_id: &str,
  ) -> Result<UserTournament, TournamentError>;

  fn votes_for(&self, user_tournament_id: u64) -> Result<Vec<Vote>, TournamentError>;

  /// Runs `apply` against the user's run (created on first use) and stores
  /// the mutated run plus the returned vote as one unit.
  fn commit_vote<F>(
    &self,
    tournament_id: u64,
    user_id: &str,
    apply: F,
  ) -> Result<UserTournament, TournamentError>
  where
    F: FnOnce(&mut UserTournament) -> Result<NewVote, TournamentError>;

  fn results_snapshot(&self, tournament_id: u64) -> Result<ResultsSnapshot, TournamentError>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoreState {
  next_tournament_id: u64,
  next_user_tournament_id: u64,
  next_vote_id: u64,
  tournaments: BTreeMap<u64, Tournament>,
  user_tournaments: BTreeMap<u64, UserTournament>,
  votes: Vec<Vote>,
  #[serde(skip)]
  user_index: HashMap<(u64, String), u64>,
}

impl StoreState {
  fn rebuild_index(&mut self) {
    self.user_index = self
      .user_tournaments
      .values()
      .map(|run| ((run.tournament_id, run.user_id.clone()), run.id))
      .collect();
  }

  fn tournament(&self, id: u64) -> Result<&Tournament, TournamentError> {
    self
      .tournaments
      .get(&id)
      .ok_or_else(|| TournamentError::NotFound(format!("tournament {id}")))
  }

  fn user_tournament(&self, tournament_id: u64, user_id: &str) -> Option<&UserTournament> {
    let id = self.user_index.get(&(tournament_id, user_id.to_string()))?;
    self.user_tournaments.get(id)
  }

  fn outcomes(&self, tournament_id: u64) -> Vec<Outcome> {
    self
      .user_tournaments
      .values()
      .filter(|run| run.tournament_id == tournament_id)
      .map(|run| Outcome {
        completed: run.completed,
        winner_entry: run.winner_entry,
      })
      .collect()
  }

  fn new_user_tournament(&mut self, tournament_id: u64, user_id: &str) -> Result<UserTournament, TournamentError> {
    let template = self.tournament(tournament_id)?.bracket_template.clone();
    Ok(UserTournament::start(
      self.next_user_tournament_id + 1,
      tournament_id,
      user_id,
      template,
      Utc::now(),
    ))
  }

  fn put_user_tournament(&mut self, run: UserTournament) {
    self.next_user_tournament_id = self.next_user_tournament_id.max(run.id);
    self
      .user_index
      .insert((run.tournament_id, run.user_id.clone()), run.id);
    self.user_tournaments.insert(run.id, run);
  }
}

/// In-memory store, optionally mirrored to a JSON snapshot file.
pub struct MemoryStore {
  state: Mutex<StoreState>,
  path: Option<PathBuf>,
}

impl Default for MemoryStore {
  fn default() -> Self {
    MemoryStore::new()
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    MemoryStore {
      state: Mutex::new(StoreState::default()),
      path: None,
    }
  }

  /// Loads the snapshot at `path` if it exists; every later mutation is
  /// written back to it.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, TournamentError> {
    let path = path.as_ref().to_path_buf();
    let mut state = if path.is_file() {
      let data = fs::read_to_string(&path)
        .map_err(|e| TournamentError::Storage(format!("read store {}: {e}", path.display())))?;
      serde_json::from_str::<StoreState>(&data)
        .map_err(|e| TournamentError::Storage(format!("parse store {}: {e}", path.display())))?
    } else {
      StoreState::default()
    };
    state.rebuild_index();
    info!(
      "Loaded store from {} ({} tournaments, {} user runs)",
      path.display(),
      state.tournaments.len(),
      state.user_tournaments.len()
    );
    Ok(MemoryStore {
      state: Mutex::new(state),
      path: Some(path),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, StoreState>, TournamentError> {
    self.state.lock().map_err(|e| TournamentError::Storage(e.to_string()))
  }

  /// Lock the state, run `f`, then persist. `f` either fails without
  /// touching the state or completes all of its writes; a failed persist
  /// restores the previous state.
  fn with_state<F, R>(&self, f: F) -> Result<R, TournamentError>
  where
    F: FnOnce(&mut StoreState) -> Result<R, TournamentError>,
  {
    let mut guard = self.lock()?;
    let Some(path) = self.path.as_ref() else {
      return f(&mut *guard);
    };
    let backup = guard.clone();
    let out = f(&mut *guard)?;
    if let Err(e) = write_snapshot(path, &*guard) {
      warn!("Rolling back store mutation: {e}");
      *guard = backup;
      return Err(e);
    }
    Ok(out)
  }
}

fn write_snapshot(path: &Path, state: &StoreState) -> Result<(), TournamentError> {
  let payload = serde_json::to_string_pretty(state).map_err(|e| TournamentError::Storage(e.to_string()))?;
  let tmp = path.with_extension("json.tmp");
  fs::write(&tmp, payload)
    .map_err(|e| TournamentError::Storage(format!("write store {}: {e}", tmp.display())))?;
  fs::rename(&tmp, path)
    .map_err(|e| TournamentError::Storage(format!("replace store {}: {e}", path.display())))?;
  debug!("Store snapshot written to {}", path.display());
  Ok(())
}

impl TournamentStore for MemoryStore {
  fn insert_tournament(&self, draft: TournamentDraft) -> Result<Tournament, TournamentError> {
    self.with_state(|state| {
      state.next_tournament_id += 1;
      let tournament = Tournament {
        id: state.next_tournament_id,
        question: draft.question,
        entries: draft.entries,
        bracket_template: draft.bracket_template,
        created_at: Utc::now(),
      };
      state.tournaments.insert(tournament.id, tournament.clone());
      Ok(tournament)
    })
  }

  fn tournament(&self, id: u64) -> Result<Tournament, TournamentError> {
    let guard = self.lock()?;
    guard.tournament(id).cloned()
  }

  fn list_tournaments(&self) -> Result<Vec<TournamentSummary>, TournamentError> {
    let guard = self.lock()?;
    let mut out = guard
      .tournaments
      .values()
      .map(|tournament| {
        let stats = participation_stats(&guard.outcomes(tournament.id));
        TournamentSummary {
          id: tournament.id,
          question: question_preview(&tournament.question),
          num_prompts: tournament.entries.len(),
          created_at: tournament.created_at,
          total_participants: stats.total_participants,
          completed_participants: stats.completed_participants,
          completion_rate: stats.completion_rate,
        }
      })
      .collect::<Vec<_>>();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    Ok(out)
  }

  fn delete_tournament(&self, id: u64) -> Result<(), TournamentError> {
    self.with_state(|state| {
      state.tournament(id)?;
      state.tournaments.remove(&id);
      let removed = state
        .user_tournaments
        .values()
        .filter(|run| run.tournament_id == id)
        .map(|run| run.id)
        .collect::<Vec<_>>();
      for run_id in &removed {
        state.user_tournaments.remove(run_id);
      }
      state.votes.retain(|vote| !removed.contains(&vote.user_tournament_id));
      state.user_index.retain(|(tournament_id, _), _| *tournament_id != id);
      Ok(())
    })
  }

  fn find_user_tournament(
    &self,
    tournament_id: u64,
    user_id: &str,
  ) -> Result<Option<UserTournament>, TournamentError> {
    let guard = self.lock()?;
    guard.tournament(tournament_id)?;
    Ok(guard.user_tournament(tournament_id, user_id).cloned())
  }

  fn get_or_create_user_tournament(
    &self,
    tournament_id: u64,
    user_id: &str,
  ) -> Result<UserTournament, TournamentError> {
    {
      let guard = self.lock()?;
      guard.tournament(tournament_id)?;
      if let Some(existing) = guard.user_tournament(tournament_id, user_id) {
        return Ok(existing.clone());
      }
    }
    self.with_state(|state| {
      // Another caller may have created the run between the two locks.
      if let Some(existing) = state.user_tournament(tournament_id, user_id) {
        return Ok(existing.clone());
      }
      let run = state.new_user_tournament(tournament_id, user_id)?;
      state.put_user_tournament(run.clone());
      Ok(run)
    })
  }

  fn votes_for(&self, user_tournament_id: u64) -> Result<Vec<Vote>, TournamentError> {
    let guard = self.lock()?;
    Ok(
      guard
        .votes
        .iter()
        .filter(|vote| vote.user_tournament_id == user_tournament_id)
        .cloned()
        .collect(),
    )
  }

  fn commit_vote<F>(
    &self,
    tournament_id: u64,
    user_id: &str,
    apply: F,
  ) -> Result<UserTournament, TournamentError>
  where
    F: FnOnce(&mut UserTournament) -> Result<NewVote, TournamentError>,
  {
    self.with_state(|state| {
      let mut run = match state.user_tournament(tournament_id, user_id) {
        Some(existing) => existing.clone(),
        None => state.new_user_tournament(tournament_id, user_id)?,
      };
      let vote = apply(&mut run)?;

      let duplicate = state.votes.iter().any(|existing| {
        existing.user_tournament_id == run.id
          && existing.round_number == vote.round_number
          && existing.match_number == vote.match_number
      });
      if duplicate {
        return Err(TournamentError::AlreadyDecided {
          round: vote.round_number,
          index: vote.match_number,
        });
      }

      state.next_vote_id += 1;
      state.votes.push(Vote {
        id: state.next_vote_id,
        user_tournament_id: run.id,
        round_number: vote.round_number,
        match_number: vote.match_number,
        winner_entry: vote.winner_entry,
        created_at: Utc::now(),
      });
      state.put_user_tournament(run.clone());
      Ok(run)
    })
  }

  fn results_snapshot(&self, tournament_id: u64) -> Result<ResultsSnapshot, TournamentError> {
    let guard = self.lock()?;
    let tournament = guard.tournament(tournament_id)?;
    Ok(ResultsSnapshot {
      entries: tournament.entries.clone(),
      outcomes: guard.outcomes(tournament_id),
    })
  }
}
