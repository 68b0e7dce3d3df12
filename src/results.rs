use serde::Serialize;
use std::cmp::Ordering;

use crate::types::Entry;

/// Completion state of one user's run, as read from the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
  pub completed: bool,
  pub winner_entry: Option<usize>,
}

/// Everything the aggregator needs, read under a single store lock.
#[derive(Clone, Debug)]
pub struct ResultsSnapshot {
  pub entries: Vec<Entry>,
  pub outcomes: Vec<Outcome>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRanking {
  pub prompt_index: usize,
  pub prompt: String,
  pub model: String,
  pub win_count: usize,
  pub win_percentage: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationStats {
  pub total_participants: usize,
  pub completed_participants: usize,
  pub completion_rate: f64,
}

pub fn rankings(snapshot: &ResultsSnapshot) -> Vec<PromptRanking> {
  let completed = snapshot
    .outcomes
    .iter()
    .filter(|outcome| outcome.completed)
    .collect::<Vec<_>>();

  let mut out = snapshot
    .entries
    .iter()
    .map(|entry| {
      let win_count = completed
        .iter()
        .filter(|outcome| outcome.winner_entry == Some(entry.position))
        .count();
      PromptRanking {
        prompt_index: entry.position,
        prompt: entry.text.clone(),
        model: entry.model.clone(),
        win_count,
        win_percentage: percentage(win_count, completed.len()),
      }
    })
    .collect::<Vec<_>>();

  out.sort_by(|a, b| {
    b.win_count
      .cmp(&a.win_count)
      .then_with(|| b.win_percentage.partial_cmp(&a.win_percentage).unwrap_or(Ordering::Equal))
      .then_with(|| a.prompt_index.cmp(&b.prompt_index))
  });
  out
}

pub fn participation_stats(outcomes: &[Outcome]) -> ParticipationStats {
  let total = outcomes.len();
  let completed = outcomes.iter().filter(|outcome| outcome.completed).count();
  ParticipationStats {
    total_participants: total,
    completed_participants: completed,
    completion_rate: percentage(completed, total),
  }
}

/// `part / whole * 100` rounded to two decimals, 0 when `whole` is 0.
pub fn percentage(part: usize, whole: usize) -> f64 {
  if whole == 0 {
    return 0.0;
  }
  let raw = part as f64 / whole as f64 * 100.0;
  (raw * 100.0).round() / 100.0
}
