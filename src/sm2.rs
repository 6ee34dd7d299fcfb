//! SM-2 spaced repetition scheduling.
//!
//! After each review the easiness factor (EF) moves by
//! `0.1 - (5 - q) * (0.08 + (5 - q) * 0.02)` and never drops below 1.3.
//! A rating below 3 sends the card back to a one day interval. Successful
//! reviews step through 1 day, 6 days, then `round(interval * EF)`.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::models::{FlashcardProgress, Quality, MIN_EASINESS};

/// Upper bound on a scheduled interval, about a century.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// EF after a review of the given quality.
pub fn next_easiness(easiness: f64, quality: Quality) -> f64 {
    let miss = 5.0 - f64::from(quality.value());
    (easiness + (0.1 - miss * (0.08 + miss * 0.02))).max(MIN_EASINESS)
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Fresh record using the configured starting easiness.
    pub fn new_record(
        &self,
        user_id: &str,
        flashcard_id: &str,
        now: DateTime<Utc>,
    ) -> FlashcardProgress {
        let mut record = FlashcardProgress::new(user_id, flashcard_id, now);
        record.easiness_factor = self.config.initial_easiness;
        record
    }

    /// Apply a review to a copy of `record` and return it.
    pub fn process_review(
        &self,
        record: &FlashcardProgress,
        quality: Quality,
        now: DateTime<Utc>,
    ) -> FlashcardProgress {
        let mut next = record.clone();
        self.review_card(&mut next, quality, now);
        next
    }

    /// Apply a review in place.
    pub fn review_card(
        &self,
        record: &mut FlashcardProgress,
        quality: Quality,
        now: DateTime<Utc>,
    ) {
        record.easiness_factor = next_easiness(record.easiness_factor, quality);

        if quality.is_success() {
            record.repetitions += 1;
            record.interval = self.success_interval(
                record.repetitions,
                record.interval,
                record.easiness_factor,
            );

            if record.interval >= self.config.mastery_interval_days {
                record.is_mastered = true;
                record.is_learning = false;
            }

            record.streak += 1;
            record.best_streak = record.best_streak.max(record.streak);
            record.total_correct += 1;
        } else {
            record.repetitions = 0;
            record.interval = 1;
            record.is_learning = true;
            record.streak = 0;
            record.total_incorrect += 1;

            if !self.config.mastery_is_sticky {
                record.is_mastered = false;
            }
        }

        record.total_reviews += 1;
        record.last_reviewed_at = Some(now);
        record.next_review_date = now + Duration::days(i64::from(record.interval));

        debug!(
            flashcard = %record.flashcard_id,
            quality = quality.value(),
            interval = record.interval,
            easiness = record.easiness_factor,
            "scheduled review"
        );
    }

    fn success_interval(&self, repetitions: u32, interval: u32, easiness: f64) -> u32 {
        let days = match repetitions {
            1 => 1,
            2 => 6,
            _ => (f64::from(interval) * easiness).round() as u32,
        };
        days.clamp(1, MAX_INTERVAL_DAYS)
    }

    /// Interval each quality rating would produce, without touching the record.
    pub fn preview_intervals(&self, record: &FlashcardProgress) -> Vec<(Quality, u32)> {
        Quality::ALL
            .iter()
            .map(|&quality| {
                let interval = if quality.is_success() {
                    self.success_interval(
                        record.repetitions + 1,
                        record.interval,
                        next_easiness(record.easiness_factor, quality),
                    )
                } else {
                    1
                };
                (quality, interval)
            })
            .collect()
    }
}

/// Human readable interval: `1d`, `3mo`, `1.2y`.
pub fn format_interval(days: u32) -> String {
    if days < 30 {
        format!("{}d", days)
    } else if days < 365 {
        format!("{}mo", (days as f64 / 30.0).round() as u32)
    } else {
        format!("{:.1}y", days as f64 / 365.0)
    }
}
