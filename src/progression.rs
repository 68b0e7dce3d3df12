use crate::bracket::{Bracket, Match, Slot};
use crate::error::TournamentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchState {
  /// A participant slot is still waiting on an earlier match.
  Unfillable,
  Votable,
  Decided,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteOutcome {
  pub final_round: bool,
  /// Set when the vote decided the final.
  pub champion: Option<usize>,
}

impl Match {
  pub fn state(&self) -> MatchState {
    if self.winner.is_some() {
      return MatchState::Decided;
    }
    match (self.participant1, self.participant2) {
      (Some(Slot::Entry(_)), Some(Slot::Entry(_))) => MatchState::Votable,
      _ => MatchState::Unfillable,
    }
  }
}

impl Bracket {
  /// Records `winner` for the match and moves it up the bracket.
  ///
  /// All checks run before anything is written, so a failed vote leaves the
  /// bracket untouched.
  pub fn apply_vote(
    &mut self,
    round: usize,
    index: usize,
    winner: usize,
  ) -> Result<VoteOutcome, TournamentError> {
    let rounds = self.rounds.len();
    let matches = self
      .rounds
      .get(round)
      .ok_or(TournamentError::InvalidRound { round, rounds })?;
    let current = matches.get(index).ok_or(TournamentError::InvalidMatch {
      round,
      index,
      matches: matches.len(),
    })?;

    let participants = match (current.participant1, current.participant2) {
      (Some(Slot::Entry(a)), Some(Slot::Entry(b))) => [a, b],
      _ => return Err(TournamentError::MatchNotReady { round, index }),
    };
    if current.winner.is_some() {
      return Err(TournamentError::AlreadyDecided { round, index });
    }
    if !participants.contains(&winner) {
      return Err(TournamentError::InvalidWinner { winner, participants });
    }

    self.rounds[round][index].winner = Some(Slot::Entry(winner));
    self.advance_winner(round, index, Slot::Entry(winner));

    let final_round = round + 1 == rounds;
    Ok(VoteOutcome {
      final_round,
      champion: final_round.then_some(winner),
    })
  }

  /// Fills the parent slot of a decided match, cascading while the parent
  /// is decided by a bye.
  pub(crate) fn advance_winner(&mut self, round: usize, index: usize, winner: Slot) {
    let (mut round, mut index, mut winner) = (round, index, winner);
    while round + 1 < self.rounds.len() {
      let Some(parent) = self.rounds[round + 1].get_mut(index / 2) else {
        return;
      };
      if index % 2 == 0 {
        parent.participant1 = Some(winner);
      } else {
        parent.participant2 = Some(winner);
      }
      if parent.winner.is_some() {
        return;
      }
      let Some(decided) = parent.bye_winner() else {
        return;
      };
      parent.winner = Some(decided);
      round += 1;
      index /= 2;
      winner = decided;
    }
  }

  /// First votable match in bracket order, computed from current state.
  pub fn next_votable(&self) -> Option<(usize, usize)> {
    self.rounds.iter().enumerate().find_map(|(round, matches)| {
      matches
        .iter()
        .position(|set| set.state() == MatchState::Votable)
        .map(|index| (round, index))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn four_entries() -> Bracket {
    Bracket {
      rounds: vec![
        vec![
          Match { participant1: Some(Slot::Entry(0)), participant2: Some(Slot::Entry(1)), winner: None },
          Match { participant1: Some(Slot::Entry(2)), participant2: Some(Slot::Entry(3)), winner: None },
        ],
        vec![Match::default()],
      ],
    }
  }

  fn three_entries() -> Bracket {
    Bracket {
      rounds: vec![
        vec![
          Match { participant1: Some(Slot::Bye), participant2: Some(Slot::Entry(2)), winner: Some(Slot::Entry(2)) },
          Match { participant1: Some(Slot::Entry(0)), participant2: Some(Slot::Entry(1)), winner: None },
        ],
        vec![Match { participant1: Some(Slot::Entry(2)), participant2: None, winner: None }],
      ],
    }
  }

  #[test]
  fn test_vote_advances_winner() {
    let mut bracket = four_entries();
    let outcome = bracket.apply_vote(0, 1, 3).unwrap();
    assert_eq!(outcome, VoteOutcome { final_round: false, champion: None });
    assert_eq!(bracket.rounds[0][1].winner, Some(Slot::Entry(3)));
    assert_eq!(bracket.rounds[1][0].participant2, Some(Slot::Entry(3)));
    assert_eq!(bracket.rounds[1][0].participant1, None);
  }

  #[test]
  fn test_full_run_to_champion() {
    let mut bracket = four_entries();
    bracket.apply_vote(0, 0, 1).unwrap();
    bracket.apply_vote(0, 1, 2).unwrap();
    let outcome = bracket.apply_vote(1, 0, 2).unwrap();
    assert_eq!(outcome, VoteOutcome { final_round: true, champion: Some(2) });
    assert_eq!(bracket.champion(), Some(2));
    assert!(bracket.is_complete());
    assert_eq!(bracket.next_votable(), None);
  }

  #[test]
  fn test_repeat_vote_is_already_decided() {
    let mut bracket = four_entries();
    bracket.apply_vote(0, 0, 0).unwrap();
    let err = bracket.apply_vote(0, 0, 1).unwrap_err();
    assert!(matches!(err, TournamentError::AlreadyDecided { round: 0, index: 0 }));
    assert_eq!(bracket.rounds[1][0].participant1, Some(Slot::Entry(0)));
  }

  #[test]
  fn test_invalid_winner_on_votable_matches() {
    let mut bracket = four_entries();
    for winner in [2, 3, 9] {
      let err = bracket.apply_vote(0, 0, winner).unwrap_err();
      assert!(matches!(err, TournamentError::InvalidWinner { participants: [0, 1], .. }));
    }
    bracket.apply_vote(0, 0, 0).unwrap();
    bracket.apply_vote(0, 1, 3).unwrap();
    let err = bracket.apply_vote(1, 0, 1).unwrap_err();
    assert!(matches!(err, TournamentError::InvalidWinner { winner: 1, participants: [0, 3] }));
    assert_eq!(bracket, {
      let mut expected = four_entries();
      expected.apply_vote(0, 0, 0).unwrap();
      expected.apply_vote(0, 1, 3).unwrap();
      expected
    });
  }

  #[test]
  fn test_out_of_range() {
    let mut bracket = four_entries();
    assert!(matches!(
      bracket.apply_vote(2, 0, 0).unwrap_err(),
      TournamentError::InvalidRound { round: 2, rounds: 2 }
    ));
    assert!(matches!(
      bracket.apply_vote(0, 2, 0).unwrap_err(),
      TournamentError::InvalidMatch { round: 0, index: 2, matches: 2 }
    ));
  }

  #[test]
  fn test_unfilled_and_bye_matches_not_ready() {
    let mut bracket = three_entries();
    assert!(matches!(
      bracket.apply_vote(1, 0, 2).unwrap_err(),
      TournamentError::MatchNotReady { round: 1, index: 0 }
    ));
    assert!(matches!(
      bracket.apply_vote(0, 0, 2).unwrap_err(),
      TournamentError::MatchNotReady { round: 0, index: 0 }
    ));
  }

  #[test]
  fn test_next_votable_follows_state() {
    let mut bracket = three_entries();
    assert_eq!(bracket.next_votable(), Some((0, 1)));
    bracket.apply_vote(0, 1, 0).unwrap();
    assert_eq!(bracket.next_votable(), Some((1, 0)));
    assert_eq!(bracket.rounds[1][0].state(), MatchState::Votable);
    bracket.apply_vote(1, 0, 0).unwrap();
    assert_eq!(bracket.next_votable(), None);
  }

  #[test]
  fn test_match_states() {
    let bracket = three_entries();
    assert_eq!(bracket.rounds[0][0].state(), MatchState::Decided);
    assert_eq!(bracket.rounds[0][1].state(), MatchState::Votable);
    assert_eq!(bracket.rounds[1][0].state(), MatchState::Unfillable);
  }

  #[test]
  fn test_advance_cascades_through_bye_parent() {
    let mut bracket = Bracket {
      rounds: vec![
        vec![
          Match { participant1: Some(Slot::Entry(0)), participant2: Some(Slot::Entry(1)), winner: None },
          Match::default(),
        ],
        vec![Match { participant1: None, participant2: Some(Slot::Bye), winner: None }],
      ],
    };
    let outcome = bracket.apply_vote(0, 0, 1).unwrap();
    assert!(!outcome.final_round);
    assert_eq!(bracket.rounds[1][0].winner, Some(Slot::Entry(1)));
    assert_eq!(bracket.champion(), Some(1));
  }
}
