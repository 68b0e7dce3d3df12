use chrono::{DateTime, Utc};

use crate::bracket::Bracket;
use crate::error::TournamentError;
use crate::progression::VoteOutcome;
use crate::store::TournamentStore;
use crate::types::{NewVote, Tournament, UserState, UserTournament, Vote, VoteResult};

impl UserTournament {
  /// A fresh run over its own copy of the tournament template.
  pub fn start(
    id: u64,
    tournament_id: u64,
    user_id: &str,
    template: Bracket,
    now: DateTime<Utc>,
  ) -> Self {
    UserTournament {
      id,
      tournament_id,
      user_id: user_id.to_string(),
      bracket: template,
      completed: false,
      winner_entry: None,
      started_at: now,
      completed_at: None,
    }
  }

  pub fn apply_vote(
    &mut self,
    round: usize,
    index: usize,
    winner: usize,
    now: DateTime<Utc>,
  ) -> Result<VoteOutcome, TournamentError> {
    let outcome = self.bracket.apply_vote(round, index, winner)?;
    if let Some(champion) = outcome.champion {
      self.completed = true;
      self.completed_at = Some(now);
      self.winner_entry = Some(champion);
    }
    Ok(outcome)
  }

  pub fn user_state(&self) -> UserState {
    user_state_for(&self.bracket, self.completed, self.winner_entry)
  }
}

fn user_state_for(bracket: &Bracket, completed: bool, winner_entry: Option<usize>) -> UserState {
  UserState {
    completed,
    winner_prompt_index: winner_entry,
    next_match: bracket.next_votable(),
  }
}

pub fn get_or_create<S: TournamentStore>(
  store: &S,
  tournament_id: u64,
  user_id: &str,
) -> Result<UserTournament, TournamentError> {
  store.get_or_create_user_tournament(tournament_id, user_id)
}

/// Applies one vote for `user_id` and persists the result atomically.
pub fn record_vote<S: TournamentStore>(
  store: &S,
  tournament_id: u64,
  user_id: &str,
  round: usize,
  index: usize,
  winner: usize,
) -> Result<VoteResult, TournamentError> {
  let run = store.commit_vote(tournament_id, user_id, |run| {
    run.apply_vote(round, index, winner, Utc::now())?;
    Ok(NewVote {
      round_number: round,
      match_number: index,
      winner_entry: winner,
    })
  })?;
  Ok(VoteResult {
    user_bracket: run.bracket,
    completed: run.completed,
    winner_prompt_index: run.winner_entry,
  })
}

/// The user's bracket and state without creating anything: a user who has
/// never voted sees a copy of the template.
pub fn current_bracket<S: TournamentStore>(
  store: &S,
  tournament: &Tournament,
  user_id: &str,
) -> Result<(Bracket, UserState), TournamentError> {
  match store.find_user_tournament(tournament.id, user_id)? {
    Some(run) => {
      let state = run.user_state();
      Ok((run.bracket, state))
    }
    None => {
      let bracket = tournament.bracket_template.clone();
      let state = user_state_for(&bracket, false, None);
      Ok((bracket, state))
    }
  }
}

/// Rebuilds a bracket from vote history.
///
/// Votes are applied in `(round, match)` order: a later-round vote is only
/// legal once the matches feeding it are decided, which creation order does
/// not guarantee.
pub fn replay_votes(template: &Bracket, votes: &[Vote]) -> Result<Bracket, TournamentError> {
  let mut ordered = votes.iter().collect::<Vec<_>>();
  ordered.sort_by_key(|vote| (vote.round_number, vote.match_number));
  let mut bracket = template.clone();
  for vote in ordered {
    bracket.apply_vote(vote.round_number, vote.match_number, vote.winner_entry)?;
  }
  Ok(bracket)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bracket::{build_bracket_with_rng, Slot};
  use crate::store::MemoryStore;
  use crate::types::{Entry, TournamentDraft};
  use chrono::Duration;
  use rand::{rngs::StdRng, SeedableRng};
  use std::{
    sync::{Arc, Barrier},
    thread,
  };

  fn seeded_tournament(store: &MemoryStore, count: usize) -> Tournament {
    let mut rng = StdRng::seed_from_u64(99);
    store
      .insert_tournament(TournamentDraft {
        question: "Explain recursion.".to_string(),
        entries: (0..count)
          .map(|position| Entry {
            position,
            text: format!("Prompt {position}"),
            model: "openchat/openchat-7b:free".to_string(),
            response: format!("Response {position}"),
          })
          .collect(),
        bracket_template: build_bracket_with_rng(count, &mut rng).unwrap(),
      })
      .unwrap()
  }

  /// Votes every match in bracket order, always picking participant1.
  fn vote_to_the_end(store: &MemoryStore, tournament_id: u64, user_id: &str) -> VoteResult {
    let mut last = None;
    loop {
      let (bracket, state) = match store.find_user_tournament(tournament_id, user_id).unwrap() {
        Some(run) => (run.bracket.clone(), run.user_state()),
        None => {
          let tournament = store.tournament(tournament_id).unwrap();
          current_bracket(store, &tournament, user_id).unwrap()
        }
      };
      let Some((round, index)) = state.next_match else {
        break;
      };
      let winner = bracket.get(round, index).unwrap().participant1.unwrap().entry().unwrap();
      last = Some(record_vote(store, tournament_id, user_id, round, index, winner).unwrap());
    }
    last.unwrap()
  }

  #[test]
  fn test_four_entry_run_completes() {
    let store = MemoryStore::new();
    let tournament = seeded_tournament(&store, 4);

    let first = record_vote(&store, tournament.id, "user-a", 0, 0, tournament.bracket_template.rounds()[0][0].participant2.unwrap().entry().unwrap()).unwrap();
    assert!(!first.completed);
    assert_eq!(first.winner_prompt_index, None);

    let p = |round: usize, index: usize, bracket: &Bracket| bracket.get(round, index).unwrap().participant1.unwrap().entry().unwrap();
    let second = record_vote(&store, tournament.id, "user-a", 0, 1, p(0, 1, &first.user_bracket)).unwrap();
    assert!(!second.completed);

    let final_winner = p(1, 0, &second.user_bracket);
    let last = record_vote(&store, tournament.id, "user-a", 1, 0, final_winner).unwrap();
    assert!(last.completed);
    assert_eq!(last.winner_prompt_index, Some(final_winner));

    let run = store.find_user_tournament(tournament.id, "user-a").unwrap().unwrap();
    assert!(run.completed);
    assert!(run.completed_at.is_some());
    assert_eq!(run.winner_entry, Some(final_winner));
    assert_eq!(run.user_state().next_match, None);
  }

  #[test]
  fn test_users_are_independent() {
    let store = MemoryStore::new();
    let tournament = seeded_tournament(&store, 6);
    let result = vote_to_the_end(&store, tournament.id, "user-a");
    assert!(result.completed);

    let (bracket, state) = current_bracket(&store, &tournament, "user-b").unwrap();
    assert_eq!(bracket, tournament.bracket_template);
    assert!(!state.completed);
    assert_eq!(state.next_match, tournament.bracket_template.next_votable());
    assert!(store.find_user_tournament(tournament.id, "user-b").unwrap().is_none());
  }

  #[test]
  fn test_engine_errors_propagate_unchanged() {
    let store = MemoryStore::new();
    let tournament = seeded_tournament(&store, 4);
    let err = record_vote(&store, tournament.id, "user-a", 5, 0, 0).unwrap_err();
    assert!(matches!(err, TournamentError::InvalidRound { round: 5, rounds: 2 }));
    let err = record_vote(&store, tournament.id, "user-a", 1, 0, 0).unwrap_err();
    assert!(matches!(err, TournamentError::MatchNotReady { round: 1, index: 0 }));
  }

  #[test]
  fn test_second_vote_on_same_match() {
    let store = MemoryStore::new();
    let tournament = seeded_tournament(&store, 4);
    let set = &tournament.bracket_template.rounds()[0][0];
    let (a, b) = (set.participant1.unwrap().entry().unwrap(), set.participant2.unwrap().entry().unwrap());
    record_vote(&store, tournament.id, "user-a", 0, 0, a).unwrap();
    let err = record_vote(&store, tournament.id, "user-a", 0, 0, b).unwrap_err();
    assert!(matches!(err, TournamentError::AlreadyDecided { round: 0, index: 0 }));
  }

  #[test]
  fn test_get_or_create_twice() {
    let store = MemoryStore::new();
    let tournament = seeded_tournament(&store, 3);
    let first = get_or_create(&store, tournament.id, "user-a").unwrap();
    let second = get_or_create(&store, tournament.id, "user-a").unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(store.results_snapshot(tournament.id).unwrap().outcomes.len(), 1);
  }

  #[test]
  fn test_replay_matches_persisted_bracket() {
    let store = MemoryStore::new();
    let tournament = seeded_tournament(&store, 7);
    vote_to_the_end(&store, tournament.id, "user-a");
    let run = store.find_user_tournament(tournament.id, "user-a").unwrap().unwrap();
    let mut votes = store.votes_for(run.id).unwrap();

    // Newest first: replay must still apply earlier rounds before later ones.
    votes.reverse();
    let rebuilt = replay_votes(&tournament.bracket_template, &votes).unwrap();
    assert_eq!(rebuilt, run.bracket);
  }

  #[test]
  fn test_replay_rejects_impossible_history() {
    let template = {
      let mut rng = StdRng::seed_from_u64(1);
      build_bracket_with_rng(4, &mut rng).unwrap()
    };
    let vote = Vote {
      id: 1,
      user_tournament_id: 1,
      round_number: 1,
      match_number: 0,
      winner_entry: 0,
      created_at: Utc::now() - Duration::seconds(5),
    };
    assert!(matches!(
      replay_votes(&template, &[vote]).unwrap_err(),
      TournamentError::MatchNotReady { .. }
    ));
  }

  #[test]
  fn test_start_copies_template() {
    let mut rng = StdRng::seed_from_u64(8);
    let template = build_bracket_with_rng(5, &mut rng).unwrap();
    let mut run = UserTournament::start(1, 1, "user-a", template.clone(), Utc::now());
    let (round, index) = run.bracket.next_votable().unwrap();
    let winner = run.bracket.get(round, index).unwrap().participant2.unwrap();
    assert!(matches!(winner, Slot::Entry(_)));
    run.apply_vote(round, index, winner.entry().unwrap(), Utc::now()).unwrap();
    assert_ne!(run.bracket, template);
    assert_eq!(template.get(round, index).unwrap().winner, None);
  }

  fn opening_pair(tournament: &Tournament, index: usize) -> (usize, usize) {
    let set = tournament.bracket_template.get(0, index).unwrap();
    (set.participant1.unwrap().entry().unwrap(), set.participant2.unwrap().entry().unwrap())
  }

  #[test]
  fn test_concurrent_votes_on_same_match() {
    for attempt in 0..20 {
      let store = Arc::new(MemoryStore::new());
      let tournament = seeded_tournament(&store, 4);
      let (left, right) = opening_pair(&tournament, 0);
      let barrier = Arc::new(Barrier::new(2));

      let voters = [left, right].map(|winner| {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let tournament_id = tournament.id;
        thread::spawn(move || {
          barrier.wait();
          record_vote(&*store, tournament_id, "user-a", 0, 0, winner).map(|_| winner)
        })
      });
      let outcomes = voters.map(|voter| voter.join().unwrap());

      let accepted = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect::<Vec<_>>();
      assert_eq!(accepted.len(), 1, "attempt {attempt}");
      let rejected = outcomes.iter().filter(|outcome| {
        matches!(outcome, Err(TournamentError::AlreadyDecided { round: 0, index: 0 }))
      });
      assert_eq!(rejected.count(), 1, "attempt {attempt}");

      let run = store.find_user_tournament(tournament.id, "user-a").unwrap().unwrap();
      let votes = store.votes_for(run.id).unwrap();
      assert_eq!(votes.len(), 1);
      assert_eq!(votes[0].winner_entry, *accepted[0]);
      assert_eq!(run.bracket.get(0, 0).unwrap().winner, Some(Slot::Entry(*accepted[0])));
    }
  }

  #[test]
  fn test_concurrent_votes_on_sibling_matches() {
    for attempt in 0..20 {
      let store = Arc::new(MemoryStore::new());
      let tournament = seeded_tournament(&store, 4);
      let barrier = Arc::new(Barrier::new(2));

      let voters = [0, 1].map(|index| {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let (winner, _) = opening_pair(&tournament, index);
        let tournament_id = tournament.id;
        thread::spawn(move || {
          barrier.wait();
          record_vote(&*store, tournament_id, "user-a", 0, index, winner)
        })
      });
      for voter in voters {
        assert!(voter.join().unwrap().is_ok(), "attempt {attempt}");
      }

      let run = store.find_user_tournament(tournament.id, "user-a").unwrap().unwrap();
      assert_eq!(store.votes_for(run.id).unwrap().len(), 2);
      let final_match = run.bracket.get(1, 0).unwrap();
      assert_eq!(final_match.participant1, Some(Slot::Entry(opening_pair(&tournament, 0).0)));
      assert_eq!(final_match.participant2, Some(Slot::Entry(opening_pair(&tournament, 1).0)));
      assert_eq!(run.user_state().next_match, Some((1, 0)));
    }
  }

  #[test]
  fn test_every_size_completes_in_one_fewer_votes() {
    for count in 2..=64 {
      let store = MemoryStore::new();
      let tournament = seeded_tournament(&store, count);
      let last = vote_to_the_end(&store, tournament.id, "user-a");
      assert!(last.completed, "{count} entries");
      assert!(last.winner_prompt_index.is_some_and(|winner| winner < count));

      let run = store.find_user_tournament(tournament.id, "user-a").unwrap().unwrap();
      assert_eq!(store.votes_for(run.id).unwrap().len(), count - 1, "{count} entries");
    }
  }
}
