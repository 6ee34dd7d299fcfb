//! Data models for flashcard review progress and pronunciation mastery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Self-assessed recall quality on the SM-2 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub enum Quality {
    Blackout = 0,   // No recall at all
    Wrong = 1,      // Wrong, answer looked familiar
    Slipped = 2,    // Wrong, answer came easily once shown
    Difficult = 3,  // Correct with serious difficulty
    Hesitant = 4,   // Correct after hesitation
    Perfect = 5,    // Instant recall
}

impl Quality {
    pub const ALL: [Quality; 6] = [
        Self::Blackout,
        Self::Wrong,
        Self::Slipped,
        Self::Difficult,
        Self::Hesitant,
        Self::Perfect,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    /// Ratings of 3 and above count as a successful recall.
    pub fn is_success(self) -> bool {
        self.value() >= 3
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Blackout => "Blackout",
            Self::Wrong => "Wrong",
            Self::Slipped => "Slipped",
            Self::Difficult => "Difficult",
            Self::Hesitant => "Hesitant",
            Self::Perfect => "Perfect",
        }
    }
}

impl TryFrom<i64> for Quality {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Blackout),
            1 => Ok(Self::Wrong),
            2 => Ok(Self::Slipped),
            3 => Ok(Self::Difficult),
            4 => Ok(Self::Hesitant),
            5 => Ok(Self::Perfect),
            other => Err(ValidationError::QualityOutOfRange(other)),
        }
    }
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> u8 {
        q.value()
    }
}

pub const DEFAULT_EASINESS: f64 = 2.5;
pub const MIN_EASINESS: f64 = 1.3;

/// Spaced repetition state of one flashcard for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardProgress {
    pub id: String,
    pub user_id: String,
    pub flashcard_id: String,

    // SM-2 fields
    pub easiness_factor: f64,
    pub interval: u32,
    pub repetitions: u32,

    // Scheduling
    pub next_review_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<DateTime<Utc>>,

    // Tracking
    pub total_reviews: u32,
    pub total_correct: u32,
    pub total_incorrect: u32,
    pub streak: u32,
    pub best_streak: u32,
    pub is_learning: bool,
    pub is_mastered: bool,

    /// Store revision this record was loaded at.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl FlashcardProgress {
    /// Fresh record, due immediately.
    pub fn new(user_id: &str, flashcard_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            flashcard_id: flashcard_id.to_string(),
            easiness_factor: DEFAULT_EASINESS,
            interval: 1,
            repetitions: 0,
            next_review_date: now,
            last_reviewed_at: None,
            total_reviews: 0,
            total_correct: 0,
            total_incorrect: 0,
            streak: 0,
            best_streak: 0,
            is_learning: true,
            is_mastered: false,
            version: 0,
            created_at: now,
        }
    }

    pub fn is_new(&self) -> bool {
        self.total_reviews == 0
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_date <= now
    }

    pub fn accuracy(&self) -> f64 {
        if self.total_reviews == 0 {
            0.0
        } else {
            self.total_correct as f64 / self.total_reviews as f64
        }
    }
}

/// Summary over a user's flashcards.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReviewStats {
    pub total_cards: usize,
    pub new_cards: usize,
    pub due_cards: usize,
    pub learning_cards: usize,
    pub mastered_cards: usize,
    pub total_reviews: u64,
    pub total_correct: u64,
    pub best_streak: u32,
}

impl ReviewStats {
    pub fn collect<'a>(
        records: impl IntoIterator<Item = &'a FlashcardProgress>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::default();

        for record in records {
            stats.total_cards += 1;
            if record.is_new() {
                stats.new_cards += 1;
            } else if record.is_due(now) {
                stats.due_cards += 1;
            }

            if record.is_mastered {
                stats.mastered_cards += 1;
            } else if !record.is_new() {
                stats.learning_cards += 1;
            }

            stats.total_reviews += u64::from(record.total_reviews);
            stats.total_correct += u64::from(record.total_correct);
            stats.best_streak = stats.best_streak.max(record.best_streak);
        }

        stats
    }

    pub fn accuracy(&self) -> f64 {
        if self.total_reviews == 0 {
            0.0
        } else {
            self.total_correct as f64 / self.total_reviews as f64
        }
    }
}

/// Pronunciation mastery stages, in the order a learner moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryStage {
    NotStarted,
    Discovered,
    Learning,
    Discriminating,
    Producing,
    Mastered,
}

impl MasteryStage {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Discovered => "Discovered",
            Self::Learning => "Learning",
            Self::Discriminating => "Discriminating",
            Self::Producing => "Producing",
            Self::Mastered => "Mastered",
        }
    }

    /// What the learner should do next from this stage.
    pub fn next_step(&self) -> Option<&'static str> {
        match self {
            Self::NotStarted => Some("listen to the sound"),
            Self::Discovered => Some("study how the sound is made"),
            Self::Learning => Some("practise telling it apart from similar sounds"),
            Self::Discriminating => Some("reach 80% discrimination accuracy"),
            Self::Producing => Some("record yourself until a score of 80%"),
            Self::Mastered => None,
        }
    }
}

/// Mastery state of one phoneme for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeProgress {
    pub id: String,
    pub user_id: String,
    pub phoneme_id: String,
    pub current_stage: MasteryStage,

    pub discrimination_attempts: u32,
    pub discrimination_correct: u32,
    pub discrimination_accuracy: f64,

    pub production_attempts: u32,
    pub production_best_score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrimination_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastered_at: Option<DateTime<Utc>>,

    pub mastery_level: u8,

    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl PhonemeProgress {
    pub fn new(user_id: &str, phoneme_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            phoneme_id: phoneme_id.to_string(),
            current_stage: MasteryStage::NotStarted,
            discrimination_attempts: 0,
            discrimination_correct: 0,
            discrimination_accuracy: 0.0,
            production_attempts: 0,
            production_best_score: 0.0,
            discovery_date: None,
            learning_started_at: None,
            discrimination_started_at: None,
            production_started_at: None,
            mastered_at: None,
            mastery_level: 0,
            version: 0,
            created_at: now,
        }
    }

    pub fn is_mastered(&self) -> bool {
        self.current_stage == MasteryStage::Mastered
    }
}
