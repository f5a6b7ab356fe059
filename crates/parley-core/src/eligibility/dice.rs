use std::collections::VecDeque;

use rand::RngExt;

/// Source of percentage draws in `[0, 100)`.
pub trait Dice: Send {
    fn roll(&mut self) -> f64;
}

/// Thread-local RNG draws.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDice;

impl Dice for ThreadDice {
    fn roll(&mut self) -> f64 {
        rand::rng().random_range(0.0..100.0)
    }
}

/// Replays fixed draws. Once exhausted every roll is `100.0`, which no
/// probability can beat.
#[derive(Debug, Default, Clone)]
pub struct SequenceDice {
    rolls: VecDeque<f64>,
    taken: usize,
}

impl SequenceDice {
    pub fn new(rolls: impl IntoIterator<Item = f64>) -> Self {
        Self {
            rolls: rolls.into_iter().collect(),
            taken: 0,
        }
    }

    /// Number of rolls consumed so far.
    pub fn taken(&self) -> usize {
        self.taken
    }
}

impl Dice for SequenceDice {
    fn roll(&mut self) -> f64 {
        self.taken += 1;
        self.rolls.pop_front().unwrap_or(100.0)
    }
}

/// True with `percent` chance. A zero chance never consumes a roll.
pub fn chance(dice: &mut dyn Dice, percent: f64) -> bool {
    percent > 0.0 && dice.roll() < percent
}
