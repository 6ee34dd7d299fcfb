//! Learner progress engine: SM-2 flashcard scheduling and staged
//! pronunciation mastery, with a small JSON-file store around them.

pub mod clock;
pub mod config;
pub mod error;
pub mod mastery;
pub mod models;
pub mod requests;
pub mod service;
pub mod sm2;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result, StoreError, ValidationError};
pub use mastery::{StageMachine, Transition};
pub use models::{FlashcardProgress, MasteryStage, PhonemeProgress, Quality, ReviewStats};
pub use requests::{MasteryResponse, PhonemeAction, ReviewRequest, ReviewResponse};
pub use service::ProgressService;
pub use sm2::Scheduler;
pub use storage::ProgressStore;
