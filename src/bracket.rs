use crate::error::TournamentError;
use rand::{seq::SliceRandom, Rng};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Wire value of a bye slot in persisted brackets.
pub const BYE: i64 = -1;

/// A resolved participant slot: a real entry ordinal or a bye.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
  Entry(usize),
  Bye,
}

impl Slot {
  pub fn entry(self) -> Option<usize> {
    match self {
      Slot::Entry(position) => Some(position),
      Slot::Bye => None,
    }
  }
}

impl Serialize for Slot {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Slot::Entry(position) => serializer.serialize_u64(*position as u64),
      Slot::Bye => serializer.serialize_i64(BYE),
    }
  }
}

impl<'de> Deserialize<'de> for Slot {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = i64::deserialize(deserializer)?;
    match raw {
      BYE => Ok(Slot::Bye),
      value if value >= 0 => Ok(Slot::Entry(value as usize)),
      value => Err(de::Error::custom(format!("invalid bracket slot {value}"))),
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
  #[serde(default)]
  pub participant1: Option<Slot>,
  #[serde(default)]
  pub participant2: Option<Slot>,
  #[serde(default)]
  pub winner: Option<Slot>,
}

impl Match {
  fn opening(participant1: Slot, participant2: Slot) -> Self {
    let mut set = Match {
      participant1: Some(participant1),
      participant2: Some(participant2),
      winner: None,
    };
    set.winner = set.bye_winner();
    set
  }

  /// Winner forced by a bye, once both slots are filled.
  pub fn bye_winner(&self) -> Option<Slot> {
    match (self.participant1?, self.participant2?) {
      (Slot::Bye, other) | (other, Slot::Bye) => Some(other),
      _ => None,
    }
  }
}

/// Rounds of matches, round 0 first and the final last.
///
/// Serializes as the nested `[[{participant1, participant2, winner}]]` array
/// that stored tournaments use, with byes as `-1`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bracket {
  pub(crate) rounds: Vec<Vec<Match>>,
}

impl Bracket {
  pub fn rounds(&self) -> &[Vec<Match>] {
    &self.rounds
  }

  pub fn round_count(&self) -> usize {
    self.rounds.len()
  }

  pub fn get(&self, round: usize, index: usize) -> Option<&Match> {
    self.rounds.get(round)?.get(index)
  }

  pub fn final_match(&self) -> Option<&Match> {
    self.rounds.last()?.first()
  }

  /// Entry that won the final, if it has been decided.
  pub fn champion(&self) -> Option<usize> {
    self.final_match()?.winner?.entry()
  }

  pub fn is_complete(&self) -> bool {
    self.champion().is_some()
  }

  /// Round-0 slots in bracket order.
  pub fn opening_slots(&self) -> Vec<Option<Slot>> {
    self
      .rounds
      .first()
      .map(|round| {
        round
          .iter()
          .flat_map(|set| [set.participant1, set.participant2])
          .collect()
      })
      .unwrap_or_default()
  }
}

pub fn bracket_size(entry_count: usize) -> usize {
  entry_count.max(1).next_power_of_two()
}

pub fn build_bracket(entry_count: usize) -> Result<Bracket, TournamentError> {
  build_bracket_with_rng(entry_count, &mut rand::thread_rng())
}

pub fn build_bracket_with_rng<R: Rng + ?Sized>(
  entry_count: usize,
  rng: &mut R,
) -> Result<Bracket, TournamentError> {
  if entry_count < 2 {
    return Err(TournamentError::InvalidInput(format!(
      "at least 2 entries required, got {entry_count}"
    )));
  }
  let size = bracket_size(entry_count);
  let byes = bye_positions(size, size - entry_count);

  let mut pool = (0..entry_count).collect::<Vec<_>>();
  pool.shuffle(rng);
  let mut pool = pool.into_iter();
  let slots = byes
    .iter()
    .map(|is_bye| {
      if *is_bye {
        Slot::Bye
      } else {
        pool.next().map(Slot::Entry).unwrap_or(Slot::Bye)
      }
    })
    .collect::<Vec<_>>();

  let opening = slots
    .chunks(2)
    .map(|pair| Match::opening(pair[0], pair[1]))
    .collect::<Vec<_>>();

  let mut rounds = vec![opening];
  let mut matches = size / 2;
  while matches > 1 {
    matches /= 2;
    rounds.push(vec![Match::default(); matches]);
  }

  let mut bracket = Bracket { rounds };
  let decided = bracket.rounds[0]
    .iter()
    .enumerate()
    .filter_map(|(index, set)| set.winner.map(|winner| (index, winner)))
    .collect::<Vec<_>>();
  for (index, winner) in decided {
    bracket.advance_winner(0, index, winner);
  }
  Ok(bracket)
}

/// Marks which of `size` opening slots get a bye.
///
/// Byes sit `size / count` apart. A non-trivial bracket always has fewer
/// than `size / 2` byes, so the step is at least 2 and no match gets two.
fn bye_positions(size: usize, count: usize) -> Vec<bool> {
  let mut positions = vec![false; size];
  if count == 0 {
    return positions;
  }
  let step = size / count;
  for i in 0..count {
    positions[(i * step) % size] = true;
  }
  positions
}
