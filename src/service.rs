//! Load-apply-save glue between the store, the clock and the two engines.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{Config, ServiceConfig};
use crate::error::Result;
use crate::mastery::{StageMachine, Transition};
use crate::models::{FlashcardProgress, PhonemeProgress, Quality, ReviewStats};
use crate::requests::{MasteryResponse, PhonemeAction, ReviewRequest, ReviewResponse, ValidAction};
use crate::sm2::Scheduler;
use crate::storage::ProgressStore;

pub struct ProgressService<C: Clock> {
    store: ProgressStore,
    scheduler: Scheduler,
    machine: StageMachine,
    clock: C,
    retry: RetryPolicy,
}

/// How long to wait between load-apply-save attempts that lost a write race.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    fn from_config(config: &ServiceConfig) -> Self {
        Self {
            max_retries: config.conflict_retries,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Doubles per retry up to `max_delay`, then picks uniformly in `[0, cap]`.
    fn delay(&self, retry: u32) -> Duration {
        let cap = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .min(self.max_delay);
        let cap_ms = cap.as_millis() as u64;
        if cap_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=cap_ms))
    }
}

impl<C: Clock> ProgressService<C> {
    pub fn new(store: ProgressStore, config: &Config, clock: C) -> Self {
        Self {
            store,
            scheduler: Scheduler::new(config.scheduler.clone()),
            machine: StageMachine::new(config.mastery.clone()),
            clock,
            retry: RetryPolicy::from_config(&config.service),
        }
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Re-runs `attempt` while it fails on a write conflict, sleeping a
    /// jittered backoff between tries.
    fn with_retries<T>(&self, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
        let mut tries = 0;
        loop {
            match attempt() {
                Err(e) if e.is_conflict() && tries < self.retry.max_retries => {
                    tries += 1;
                    let delay = self.retry.delay(tries);
                    warn!(
                        error = %e,
                        attempt = tries,
                        delay_ms = delay.as_millis() as u64,
                        "write conflict, retrying"
                    );
                    thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    pub fn flashcard(&self, user_id: &str, flashcard_id: &str) -> Result<FlashcardProgress> {
        let now = self.clock.now();
        Ok(self.store.load_or_insert_with(user_id, flashcard_id, || {
            self.scheduler.new_record(user_id, flashcard_id, now)
        })?)
    }

    pub fn submit_review(
        &self,
        user_id: &str,
        flashcard_id: &str,
        request: ReviewRequest,
    ) -> Result<ReviewResponse> {
        let quality = request.validate()?;
        self.with_retries(|| self.review_once(user_id, flashcard_id, quality))
    }

    fn review_once(
        &self,
        user_id: &str,
        flashcard_id: &str,
        quality: Quality,
    ) -> Result<ReviewResponse> {
        let before = self.flashcard(user_id, flashcard_id)?;
        let mut after = self.scheduler.process_review(&before, quality, self.clock.now());
        self.store.save(&mut after)?;

        let response = ReviewResponse::new(&before, &after, quality);
        if response.newly_mastered {
            info!(user = user_id, flashcard = flashcard_id, "flashcard mastered");
        }
        Ok(response)
    }

    /// Interval each rating would give the card next.
    pub fn preview(&self, user_id: &str, flashcard_id: &str) -> Result<Vec<(Quality, u32)>> {
        let record = self.flashcard(user_id, flashcard_id)?;
        Ok(self.scheduler.preview_intervals(&record))
    }

    /// Due flashcards, most overdue first.
    pub fn due_cards(&self, user_id: &str) -> Result<Vec<FlashcardProgress>> {
        let now = self.clock.now();
        let mut due: Vec<FlashcardProgress> = self
            .store
            .list::<FlashcardProgress>(user_id)?
            .into_iter()
            .filter(|r| r.is_due(now))
            .collect();
        due.sort_by_key(|r| r.next_review_date);
        Ok(due)
    }

    pub fn stats(&self, user_id: &str) -> Result<ReviewStats> {
        let records = self.store.list::<FlashcardProgress>(user_id)?;
        Ok(ReviewStats::collect(&records, self.clock.now()))
    }

    pub fn phoneme(&self, user_id: &str, phoneme_id: &str) -> Result<PhonemeProgress> {
        Ok(self.store.load_or_default(user_id, phoneme_id, self.clock.now())?)
    }

    pub fn phoneme_status(&self, user_id: &str, phoneme_id: &str) -> Result<MasteryResponse> {
        let record = self.phoneme(user_id, phoneme_id)?;
        Ok(self.respond(&record, &record, false))
    }

    pub fn apply_phoneme_action(
        &self,
        user_id: &str,
        phoneme_id: &str,
        action: PhonemeAction,
    ) -> Result<MasteryResponse> {
        let action = action.validate()?;
        self.with_retries(|| self.apply_once(user_id, phoneme_id, action))
    }

    fn apply_once(
        &self,
        user_id: &str,
        phoneme_id: &str,
        action: ValidAction,
    ) -> Result<MasteryResponse> {
        let before = self.phoneme(user_id, phoneme_id)?;
        let mut after = before.clone();
        let now = self.clock.now();
        let machine = &self.machine;

        let transition = match action {
            ValidAction::Discover => machine.mark_discovered(&mut after, now),
            ValidAction::StartLearning => machine.start_learning(&mut after, now),
            ValidAction::StartDiscrimination => machine.start_discrimination(&mut after, now),
            ValidAction::DiscriminationResult { correct, total } => {
                machine.update_discrimination_progress(&mut after, correct, total, now)?
            }
            ValidAction::StartProduction => machine.start_production(&mut after, now),
            ValidAction::ProductionResult { score } => {
                machine.update_production_progress(&mut after, score, now)?
            }
        };

        // Skipped transitions leave nothing to persist
        if transition == Transition::Applied {
            self.store.save(&mut after)?;
        }

        let response = self.respond(&before, &after, transition.applied());
        if response.newly_mastered {
            info!(user = user_id, phoneme = phoneme_id, "phoneme mastered");
        }
        Ok(response)
    }

    fn respond(
        &self,
        before: &PhonemeProgress,
        after: &PhonemeProgress,
        applied: bool,
    ) -> MasteryResponse {
        MasteryResponse::new(
            before,
            after,
            applied,
            self.machine.can_practice_discrimination(after),
            self.machine.can_practice_production(after),
        )
    }
}
