//! Core types for the Triple-Helix scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retest interval tier, measured in queue positions.
///
/// The tiers form a fixed ladder: 1, 3, 5, 10, 25, 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SkipNumber {
    One,
    Three,
    Five,
    Ten,
    TwentyFive,
    Hundred,
}

impl SkipNumber {
    /// The full ladder in ascending order.
    pub const LADDER: [SkipNumber; 6] = [
        Self::One,
        Self::Three,
        Self::Five,
        Self::Ten,
        Self::TwentyFive,
        Self::Hundred,
    ];

    /// Numeric value of the tier.
    pub fn value(self) -> u32 {
        match self {
            Self::One => 1,
            Self::Three => 3,
            Self::Five => 5,
            Self::Ten => 10,
            Self::TwentyFive => 25,
            Self::Hundred => 100,
        }
    }

    /// Create from a numeric value. Only ladder values are accepted.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::One),
            3 => Some(Self::Three),
            5 => Some(Self::Five),
            10 => Some(Self::Ten),
            25 => Some(Self::TwentyFive),
            100 => Some(Self::Hundred),
            _ => None,
        }
    }

    /// The tier directly above this one, saturating at 100.
    pub fn step_up(self) -> Self {
        match self {
            Self::One => Self::Three,
            Self::Three => Self::Five,
            Self::Five => Self::Ten,
            Self::Ten => Self::TwentyFive,
            Self::TwentyFive | Self::Hundred => Self::Hundred,
        }
    }
}

impl Default for SkipNumber {
    fn default() -> Self {
        Self::One
    }
}

impl TryFrom<u32> for SkipNumber {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_value(value).ok_or_else(|| format!("invalid skip number: {value}"))
    }
}

impl From<SkipNumber> for u32 {
    fn from(skip: SkipNumber) -> Self {
        skip.value()
    }
}

impl fmt::Display for SkipNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Difficulty tier of wrong-answer options. Owned by the content side;
/// the scheduler only carries it along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistractorLevel {
    L1,
    L2,
    L3,
}

impl Default for DistractorLevel {
    fn default() -> Self {
        Self::L1
    }
}

/// One of the three content tubes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TubeNumber {
    One,
    Two,
    Three,
}

impl TubeNumber {
    /// All tubes in rotation order.
    pub const ALL: [TubeNumber; 3] = [Self::One, Self::Two, Self::Three];

    /// Convert to 1-based number.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Create from 1-based number.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            _ => None,
        }
    }

    /// Round-robin successor: `(n % 3) + 1`.
    pub fn next(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::Three,
            Self::Three => Self::One,
        }
    }

    /// Zero-based index into the tube array.
    pub fn index(self) -> usize {
        self.as_u8() as usize - 1
    }
}

impl Default for TubeNumber {
    fn default() -> Self {
        Self::One
    }
}

impl TryFrom<u8> for TubeNumber {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| format!("invalid tube number: {value}"))
    }
}

impl From<TubeNumber> for u8 {
    fn from(tube: TubeNumber) -> Self {
        tube.as_u8()
    }
}

impl fmt::Display for TubeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A schedulable learning item and its retest state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stitch {
    pub id: String,
    pub skip_number: SkipNumber,
    pub distractor_level: DistractorLevel,
    pub perfect_completions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl Stitch {
    /// Create a stitch that has never been completed.
    pub fn new(id: impl Into<String>, skip_number: SkipNumber) -> Self {
        Self {
            id: id.into(),
            skip_number,
            distractor_level: DistractorLevel::default(),
            perfect_completions: 0,
            last_completed_at: None,
        }
    }
}

/// Points earned from correct answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Points {
    pub session: u64,
    pub lifetime: u64,
}

impl Points {
    /// Points for a single correct answer.
    pub const PER_CORRECT_ANSWER: u64 = 3;

    /// Credit a finished drill and return the points it earned.
    pub fn award(&mut self, correct_answers: u32) -> u64 {
        let earned = u64::from(correct_answers) * Self::PER_CORRECT_ANSWER;
        self.session += earned;
        self.lifetime += earned;
        earned
    }

    /// Start a new session, keeping lifetime points.
    pub fn reset_session(&mut self) {
        self.session = 0;
    }
}
