//! Typed request and response payloads.
//!
//! Requests arrive with loose integer and float fields and are validated
//! into core types before any record is loaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::{FlashcardProgress, MasteryStage, PhonemeProgress, Quality};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub quality: i64,
}

impl ReviewRequest {
    pub fn validate(&self) -> Result<Quality, ValidationError> {
        Quality::try_from(self.quality)
    }
}

/// A pronunciation practice event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PhonemeAction {
    Discover,
    StartLearning,
    StartDiscrimination,
    DiscriminationResult { correct: i64, total: i64 },
    StartProduction,
    ProductionResult { score: f64 },
}

/// [`PhonemeAction`] with its numbers checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidAction {
    Discover,
    StartLearning,
    StartDiscrimination,
    DiscriminationResult { correct: u32, total: u32 },
    StartProduction,
    ProductionResult { score: f64 },
}

impl PhonemeAction {
    pub fn validate(&self) -> Result<ValidAction, ValidationError> {
        Ok(match *self {
            Self::Discover => ValidAction::Discover,
            Self::StartLearning => ValidAction::StartLearning,
            Self::StartDiscrimination => ValidAction::StartDiscrimination,
            Self::DiscriminationResult { correct, total } => {
                let correct = count("correct", correct)?;
                let total = count("total", total)?;
                if correct > total {
                    return Err(ValidationError::CorrectExceedsTotal { correct, total });
                }
                ValidAction::DiscriminationResult { correct, total }
            }
            Self::StartProduction => ValidAction::StartProduction,
            Self::ProductionResult { score } => {
                if !(0.0..=1.0).contains(&score) {
                    return Err(ValidationError::ScoreOutOfRange(score));
                }
                ValidAction::ProductionResult { score }
            }
        })
    }
}

fn count(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    u32::try_from(value).map_err(|_| ValidationError::InvalidCount { field, value })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewResponse {
    pub flashcard_id: String,
    pub quality: u8,
    pub interval: u32,
    pub repetitions: u32,
    pub easiness_factor: f64,
    pub next_review_date: DateTime<Utc>,
    pub streak: u32,
    pub accuracy: f64,
    pub is_mastered: bool,
    pub newly_mastered: bool,
}

impl ReviewResponse {
    pub fn new(before: &FlashcardProgress, after: &FlashcardProgress, quality: Quality) -> Self {
        Self {
            flashcard_id: after.flashcard_id.clone(),
            quality: quality.value(),
            interval: after.interval,
            repetitions: after.repetitions,
            easiness_factor: after.easiness_factor,
            next_review_date: after.next_review_date,
            streak: after.streak,
            accuracy: after.accuracy(),
            is_mastered: after.is_mastered,
            newly_mastered: after.is_mastered && !before.is_mastered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MasteryResponse {
    pub phoneme_id: String,
    pub stage: MasteryStage,
    /// False when the action's precondition did not hold.
    pub applied: bool,
    pub discrimination_accuracy: f64,
    pub production_best_score: f64,
    pub can_practice_discrimination: bool,
    pub can_practice_production: bool,
    pub newly_mastered: bool,
    pub mastery_level: u8,
}

impl MasteryResponse {
    pub fn new(
        before: &PhonemeProgress,
        after: &PhonemeProgress,
        applied: bool,
        can_practice_discrimination: bool,
        can_practice_production: bool,
    ) -> Self {
        Self {
            phoneme_id: after.phoneme_id.clone(),
            stage: after.current_stage,
            applied,
            discrimination_accuracy: after.discrimination_accuracy,
            production_best_score: after.production_best_score,
            can_practice_discrimination,
            can_practice_production,
            newly_mastered: after.is_mastered() && !before.is_mastered(),
            mastery_level: after.mastery_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_request_validates_quality() {
        assert_eq!(ReviewRequest { quality: 4 }.validate(), Ok(Quality::Hesitant));
        assert_eq!(
            ReviewRequest { quality: 9 }.validate(),
            Err(ValidationError::QualityOutOfRange(9))
        );
    }

    #[test]
    fn actions_parse_from_tagged_json() {
        let json = r#"{"action":"discrimination_result","correct":8,"total":10}"#;
        let action: PhonemeAction = serde_json::from_str(json).unwrap();
        assert_eq!(action, PhonemeAction::DiscriminationResult { correct: 8, total: 10 });

        let action: PhonemeAction = serde_json::from_str(r#"{"action":"start_learning"}"#).unwrap();
        assert_eq!(action, PhonemeAction::StartLearning);
    }

    #[test]
    fn negative_counts_are_rejected() {
        let err = PhonemeAction::DiscriminationResult { correct: -1, total: 10 }
            .validate()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidCount { field: "correct", value: -1 });

        assert!(PhonemeAction::DiscriminationResult { correct: 3, total: 2 }
            .validate()
            .is_err());
        assert!(PhonemeAction::ProductionResult { score: 1.5 }.validate().is_err());
        assert_eq!(
            PhonemeAction::ProductionResult { score: 0.5 }.validate(),
            Ok(ValidAction::ProductionResult { score: 0.5 })
        );
    }
}
