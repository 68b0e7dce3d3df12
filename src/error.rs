use thiserror::Error;

#[derive(Debug, Error)]
pub enum TournamentError {
  #[error("invalid input: {0}")]
  InvalidInput(String),
  #[error("invalid round number {round} (bracket has {rounds} rounds)")]
  InvalidRound { round: usize, rounds: usize },
  #[error("invalid match number {index} in round {round} ({matches} matches)")]
  InvalidMatch { round: usize, index: usize, matches: usize },
  #[error("match {index} in round {round} is not ready for voting yet")]
  MatchNotReady { round: usize, index: usize },
  #[error("match {index} in round {round} has already been decided")]
  AlreadyDecided { round: usize, index: usize },
  #[error("winner index {winner} must be one of the participants {participants:?}")]
  InvalidWinner { winner: usize, participants: [usize; 2] },
  #[error("completion failed for entry {position} ({model}): {reason}")]
  UpstreamCompletionFailure { position: usize, model: String, reason: String },
  #[error("{0} not found")]
  NotFound(String),
  #[error("storage error: {0}")]
  Storage(String),
}

impl TournamentError {
  /// Errors caused by the caller's input rather than by the system.
  pub fn is_caller_error(&self) -> bool {
    matches!(
      self,
      TournamentError::InvalidInput(_)
        | TournamentError::InvalidRound { .. }
        | TournamentError::InvalidMatch { .. }
        | TournamentError::MatchNotReady { .. }
        | TournamentError::AlreadyDecided { .. }
        | TournamentError::InvalidWinner { .. }
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_caller_errors() {
    assert!(TournamentError::AlreadyDecided { round: 0, index: 1 }.is_caller_error());
    assert!(TournamentError::InvalidInput("x".to_string()).is_caller_error());
    assert!(!TournamentError::NotFound("tournament 3".to_string()).is_caller_error());
    assert!(!TournamentError::UpstreamCompletionFailure {
      position: 0,
      model: "m".to_string(),
      reason: "timeout".to_string(),
    }
    .is_caller_error());
  }

  #[test]
  fn test_invalid_winner_message() {
    let err = TournamentError::InvalidWinner { winner: 5, participants: [0, 1] };
    assert_eq!(err.to_string(), "winner index 5 must be one of the participants [0, 1]");
  }
}
