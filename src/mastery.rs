//! Pronunciation mastery stages.
//!
//! A learner moves a phoneme through discovery, theory, same-or-different
//! discrimination drills and recorded production. Stage moves only go
//! forward. A move whose precondition does not hold leaves the record as it
//! was and reports [`Transition::Unchanged`]; clients retry these calls
//! freely, so they never fail. Only malformed numbers are rejected.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::MasteryConfig;
use crate::error::ValidationError;
use crate::models::{MasteryStage, PhonemeProgress};

/// Outcome of a stage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
}

impl Transition {
    pub fn applied(self) -> bool {
        self == Transition::Applied
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageMachine {
    config: MasteryConfig,
}

impl StageMachine {
    pub fn new(config: MasteryConfig) -> Self {
        Self { config }
    }

    pub fn mark_discovered(
        &self,
        record: &mut PhonemeProgress,
        now: DateTime<Utc>,
    ) -> Transition {
        if record.current_stage != MasteryStage::NotStarted {
            return skipped(record, "mark_discovered");
        }
        record.current_stage = MasteryStage::Discovered;
        record.discovery_date = Some(now);
        Transition::Applied
    }

    /// Also reachable straight from `NotStarted`.
    pub fn start_learning(&self, record: &mut PhonemeProgress, now: DateTime<Utc>) -> Transition {
        if !matches!(
            record.current_stage,
            MasteryStage::NotStarted | MasteryStage::Discovered
        ) {
            return skipped(record, "start_learning");
        }
        record.current_stage = MasteryStage::Learning;
        record.learning_started_at = Some(now);
        Transition::Applied
    }

    pub fn start_discrimination(
        &self,
        record: &mut PhonemeProgress,
        now: DateTime<Utc>,
    ) -> Transition {
        if record.current_stage != MasteryStage::Learning {
            return skipped(record, "start_discrimination");
        }
        record.current_stage = MasteryStage::Discriminating;
        record.discrimination_started_at = Some(now);
        Transition::Applied
    }

    pub fn can_practice_discrimination(&self, record: &PhonemeProgress) -> bool {
        record.current_stage >= MasteryStage::Learning
    }

    /// Inclusive threshold; needs at least one discrimination attempt.
    pub fn can_practice_production(&self, record: &PhonemeProgress) -> bool {
        record.discrimination_attempts > 0
            && record.discrimination_accuracy >= self.config.discrimination_threshold
    }

    /// Adds one batch of discrimination results to the running totals.
    /// Promotes to `Mastered` when the new accuracy completes the pair of
    /// thresholds with an earlier production score.
    pub fn update_discrimination_progress(
        &self,
        record: &mut PhonemeProgress,
        correct: u32,
        total: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition, ValidationError> {
        if correct > total {
            return Err(ValidationError::CorrectExceedsTotal { correct, total });
        }
        if !self.can_practice_discrimination(record) {
            return Ok(skipped(record, "update_discrimination_progress"));
        }

        record.discrimination_attempts = record.discrimination_attempts.saturating_add(total);
        record.discrimination_correct = record.discrimination_correct.saturating_add(correct);
        if record.discrimination_attempts > 0 {
            record.discrimination_accuracy =
                record.discrimination_correct as f64 / record.discrimination_attempts as f64;
        }
        self.promote_if_mastered(record, now);
        Ok(Transition::Applied)
    }

    pub fn start_production(
        &self,
        record: &mut PhonemeProgress,
        now: DateTime<Utc>,
    ) -> Transition {
        if !self.can_practice_production(record)
            || record.current_stage >= MasteryStage::Producing
        {
            return skipped(record, "start_production");
        }
        record.current_stage = MasteryStage::Producing;
        record.production_started_at = Some(now);
        Transition::Applied
    }

    /// Records one production attempt and promotes to `Mastered` once both
    /// accuracy and best score reach their thresholds.
    pub fn update_production_progress(
        &self,
        record: &mut PhonemeProgress,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<Transition, ValidationError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(ValidationError::ScoreOutOfRange(score));
        }

        record.production_attempts = record.production_attempts.saturating_add(1);
        record.production_best_score = record.production_best_score.max(score);
        self.promote_if_mastered(record, now);
        Ok(Transition::Applied)
    }

    /// Both metrics at threshold means mastered, whichever update got there last.
    fn promote_if_mastered(&self, record: &mut PhonemeProgress, now: DateTime<Utc>) {
        if record.is_mastered()
            || !self.can_practice_production(record)
            || record.production_best_score < self.config.production_threshold
        {
            return;
        }
        record.current_stage = MasteryStage::Mastered;
        record.mastered_at = Some(now);
        record.mastery_level = self.config.mastered_level;
        debug!(phoneme = %record.phoneme_id, user = %record.user_id, "phoneme mastered");
    }
}

fn skipped(record: &PhonemeProgress, operation: &str) -> Transition {
    debug!(
        phoneme = %record.phoneme_id,
        stage = ?record.current_stage,
        operation,
        "precondition not met, leaving record unchanged"
    );
    Transition::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap()
    }

    fn fresh() -> PhonemeProgress {
        PhonemeProgress::new("u1", "th-voiceless", now())
    }

    fn at_stage(stage: MasteryStage) -> PhonemeProgress {
        let mut record = fresh();
        record.current_stage = stage;
        record
    }

    #[test]
    fn happy_path_reaches_mastered() {
        let machine = StageMachine::default();
        let mut record = fresh();
        let mut t = now();

        assert!(machine.mark_discovered(&mut record, t).applied());
        t += Duration::minutes(5);
        assert!(machine.start_learning(&mut record, t).applied());
        t += Duration::minutes(5);
        assert!(machine.start_discrimination(&mut record, t).applied());
        assert_eq!(
            machine.update_discrimination_progress(&mut record, 8, 10, now()),
            Ok(Transition::Applied)
        );
        assert_eq!(record.discrimination_accuracy, 0.8);
        assert_eq!(record.current_stage, MasteryStage::Discriminating);

        t += Duration::minutes(5);
        assert!(machine.start_production(&mut record, t).applied());
        assert_eq!(record.current_stage, MasteryStage::Producing);
        assert_eq!(record.production_started_at, Some(t));

        t += Duration::minutes(5);
        machine.update_production_progress(&mut record, 0.82, t).unwrap();
        assert_eq!(record.current_stage, MasteryStage::Mastered);
        assert_eq!(record.mastery_level, 5);
        assert_eq!(record.mastered_at, Some(t));
        assert_eq!(record.production_attempts, 1);
        assert!(record.discovery_date.is_some());
        assert!(record.learning_started_at.is_some());
        assert!(record.discrimination_started_at.is_some());
    }

    #[test]
    fn learning_can_skip_discovery() {
        let machine = StageMachine::default();
        let mut record = fresh();
        assert!(machine.start_learning(&mut record, now()).applied());
        assert_eq!(record.current_stage, MasteryStage::Learning);
        assert!(record.discovery_date.is_none());
    }

    #[test]
    fn transitions_from_wrong_stage_are_no_ops() {
        let machine = StageMachine::default();

        let mut record = at_stage(MasteryStage::Learning);
        let before = record.clone();
        assert_eq!(machine.mark_discovered(&mut record, now()), Transition::Unchanged);
        assert_eq!(record, before);

        let mut record = at_stage(MasteryStage::Discriminating);
        let before = record.clone();
        assert_eq!(machine.start_learning(&mut record, now()), Transition::Unchanged);
        assert_eq!(record, before);

        let mut record = at_stage(MasteryStage::Discovered);
        let before = record.clone();
        assert_eq!(machine.start_discrimination(&mut record, now()), Transition::Unchanged);
        assert_eq!(record, before);
    }

    #[test]
    fn start_discrimination_twice_equals_once() {
        let machine = StageMachine::default();
        let mut once = at_stage(MasteryStage::Learning);
        machine.start_discrimination(&mut once, now());

        let mut twice = at_stage(MasteryStage::Learning);
        twice.id = once.id.clone();
        machine.start_discrimination(&mut twice, now());
        let later = now() + Duration::hours(1);
        assert_eq!(machine.start_discrimination(&mut twice, later), Transition::Unchanged);

        assert_eq!(once, twice);
    }

    #[test]
    fn discrimination_accuracy_is_cumulative() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Discriminating);
        machine.update_discrimination_progress(&mut record, 8, 10, now()).unwrap();
        machine.update_discrimination_progress(&mut record, 9, 10, now()).unwrap();
        assert_eq!(record.discrimination_attempts, 20);
        assert_eq!(record.discrimination_correct, 17);
        assert!((record.discrimination_accuracy - 0.85).abs() < 1e-12);
    }

    #[test]
    fn discrimination_before_learning_is_ignored() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Discovered);
        assert!(!machine.can_practice_discrimination(&record));
        assert_eq!(
            machine.update_discrimination_progress(&mut record, 5, 5, now()),
            Ok(Transition::Unchanged)
        );
        assert_eq!(record.discrimination_attempts, 0);

        for stage in [
            MasteryStage::Learning,
            MasteryStage::Discriminating,
            MasteryStage::Producing,
            MasteryStage::Mastered,
        ] {
            assert!(machine.can_practice_discrimination(&at_stage(stage)));
        }
    }

    #[test]
    fn invalid_discrimination_batch_is_rejected_untouched() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Learning);
        let before = record.clone();
        assert_eq!(
            machine.update_discrimination_progress(&mut record, 11, 10, now()),
            Err(ValidationError::CorrectExceedsTotal { correct: 11, total: 10 })
        );
        assert_eq!(record, before);
    }

    #[test]
    fn production_gate_is_inclusive() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Discriminating);
        record.discrimination_attempts = 100_000;

        record.discrimination_correct = 79_999;
        record.discrimination_accuracy = 0.79999;
        assert!(!machine.can_practice_production(&record));
        assert_eq!(machine.start_production(&mut record, now()), Transition::Unchanged);
        assert_eq!(record.current_stage, MasteryStage::Discriminating);

        record.discrimination_correct = 80_000;
        record.discrimination_accuracy = 0.80000;
        assert!(machine.can_practice_production(&record));
        assert!(machine.start_production(&mut record, now()).applied());
    }

    #[test]
    fn production_needs_discrimination_attempts() {
        let machine = StageMachine::default();
        let record = at_stage(MasteryStage::Discriminating);
        assert!(!machine.can_practice_production(&record));
    }

    #[test]
    fn start_production_never_leaves_mastered() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Mastered);
        record.discrimination_attempts = 10;
        record.discrimination_correct = 10;
        record.discrimination_accuracy = 1.0;
        assert_eq!(machine.start_production(&mut record, now()), Transition::Unchanged);
        assert_eq!(record.current_stage, MasteryStage::Mastered);
    }

    #[test]
    fn low_production_score_keeps_stage() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Producing);
        record.discrimination_attempts = 10;
        record.discrimination_correct = 9;
        record.discrimination_accuracy = 0.9;

        machine.update_production_progress(&mut record, 0.6, now()).unwrap();
        machine.update_production_progress(&mut record, 0.7, now()).unwrap();
        machine.update_production_progress(&mut record, 0.65, now()).unwrap();
        assert_eq!(record.production_attempts, 3);
        assert_eq!(record.production_best_score, 0.7);
        assert_eq!(record.current_stage, MasteryStage::Producing);
        assert_eq!(record.mastery_level, 0);
    }

    #[test]
    fn high_score_without_accuracy_does_not_master() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Discriminating);
        record.discrimination_attempts = 10;
        record.discrimination_correct = 5;
        record.discrimination_accuracy = 0.5;

        machine.update_production_progress(&mut record, 0.95, now()).unwrap();
        assert_eq!(record.current_stage, MasteryStage::Discriminating);
        assert_eq!(record.mastery_level, 0);
        assert!(record.mastered_at.is_none());
    }

    #[test]
    fn accuracy_catching_up_promotes_in_the_same_batch() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Discriminating);
        record.discrimination_attempts = 10;
        record.discrimination_correct = 5;
        record.discrimination_accuracy = 0.5;
        machine.update_production_progress(&mut record, 0.95, now()).unwrap();

        // 35 / 40 = 0.875, best score already 0.95
        let later = now() + Duration::hours(2);
        assert_eq!(
            machine.update_discrimination_progress(&mut record, 30, 30, later),
            Ok(Transition::Applied)
        );
        assert_eq!(record.current_stage, MasteryStage::Mastered);
        assert_eq!(record.mastered_at, Some(later));
        assert_eq!(record.mastery_level, 5);
        assert_eq!(record.production_attempts, 1);
    }

    #[test]
    fn discrimination_alone_never_masters() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Discriminating);
        machine.update_discrimination_progress(&mut record, 10, 10, now()).unwrap();
        assert_eq!(record.discrimination_accuracy, 1.0);
        assert_eq!(record.current_stage, MasteryStage::Discriminating);
    }

    #[test]
    fn mastered_at_is_set_once() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Producing);
        record.discrimination_attempts = 10;
        record.discrimination_correct = 10;
        record.discrimination_accuracy = 1.0;

        machine.update_production_progress(&mut record, 0.9, now()).unwrap();
        let later = now() + Duration::days(1);
        machine.update_production_progress(&mut record, 1.0, later).unwrap();
        assert_eq!(record.mastered_at, Some(now()));
        assert_eq!(record.production_best_score, 1.0);
    }

    #[test]
    fn rejects_bad_scores() {
        let machine = StageMachine::default();
        let mut record = at_stage(MasteryStage::Producing);
        for score in [-0.1, 1.01, f64::NAN] {
            assert!(machine.update_production_progress(&mut record, score, now()).is_err());
        }
        assert_eq!(record.production_attempts, 0);
    }

    #[test]
    fn custom_thresholds_apply() {
        let machine = StageMachine::new(MasteryConfig {
            discrimination_threshold: 0.9,
            production_threshold: 0.95,
            mastered_level: 3,
        });
        let mut record = at_stage(MasteryStage::Discriminating);
        machine.update_discrimination_progress(&mut record, 17, 20, now()).unwrap();
        assert!(!machine.can_practice_production(&record));
        machine.update_discrimination_progress(&mut record, 20, 20, now()).unwrap();
        assert!(machine.start_production(&mut record, now()).applied());
        machine.update_production_progress(&mut record, 0.95, now()).unwrap();
        assert!(record.is_mastered());
        assert_eq!(record.mastery_level, 3);
    }
}
