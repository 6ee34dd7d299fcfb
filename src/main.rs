//! lingo - flashcard review and pronunciation progress from the terminal.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lingo_progress::clock::{Clock, SystemClock};
use lingo_progress::sm2::format_interval;
use lingo_progress::storage::default_backup_path;
use lingo_progress::{
    Config, MasteryResponse, PhonemeAction, ProgressService, ProgressStore, ReviewRequest,
};

// ══════════════════════════════════════════════════════════════════════════
// CLI Arguments
// ══════════════════════════════════════════════════════════════════════════

#[derive(Parser, Debug)]
#[command(name = "lingo")]
#[command(
    author,
    version,
    about = "Spaced repetition and pronunciation progress tracker",
    long_about = None
)]
struct Args {
    /// Directory holding progress records
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a flashcard review
    Review {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        card: String,
        /// Recall quality, 0 (blackout) to 5 (perfect)
        #[arg(short, long, allow_negative_numbers = true)]
        quality: i64,
    },
    /// Show the interval each rating would give a card
    Preview {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        card: String,
    },
    /// List flashcards due for review
    Due {
        #[arg(short, long)]
        user: String,
    },
    /// Show review statistics
    Stats {
        #[arg(short, long)]
        user: String,
    },
    /// Pronunciation practice for one phoneme
    Phoneme {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        phoneme: String,
        #[command(subcommand)]
        action: PhonemeCommand,
    },
    /// Export all records to a backup file
    Export { path: Option<PathBuf> },
    /// Import records from a backup file
    Import { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum PhonemeCommand {
    Discover,
    Learn,
    Discriminate,
    /// Submit a batch of same-or-different answers
    Discrimination {
        #[arg(long, allow_negative_numbers = true)]
        correct: i64,
        #[arg(long, allow_negative_numbers = true)]
        total: i64,
    },
    Produce,
    /// Submit a production score between 0.0 and 1.0
    Production {
        #[arg(long, allow_negative_numbers = true)]
        score: f64,
    },
    Show,
}

impl PhonemeCommand {
    fn action(&self) -> Option<PhonemeAction> {
        Some(match *self {
            Self::Discover => PhonemeAction::Discover,
            Self::Learn => PhonemeAction::StartLearning,
            Self::Discriminate => PhonemeAction::StartDiscrimination,
            Self::Discrimination { correct, total } => {
                PhonemeAction::DiscriminationResult { correct, total }
            }
            Self::Produce => PhonemeAction::StartProduction,
            Self::Production { score } => PhonemeAction::ProductionResult { score },
            Self::Show => return None,
        })
    }
}

// ══════════════════════════════════════════════════════════════════════════
// Main Entry Point
// ══════════════════════════════════════════════════════════════════════════

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "lingo_progress=info".into()),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Determine data directory
    let data_dir = args
        .data_dir
        .or_else(|| config.storage.data_dir.clone())
        .unwrap_or_else(ProgressStore::default_path);

    let store = ProgressStore::new(data_dir.clone())
        .with_context(|| format!("Failed to open data directory: {:?}", data_dir))?
        .with_lock_stale_after(config.storage.lock_stale_after());
    let service = ProgressService::new(store, &config, SystemClock);

    run(&service, args.command)
}

fn run(service: &ProgressService<SystemClock>, command: Command) -> Result<()> {
    match command {
        Command::Review { user, card, quality } => {
            let response = service.submit_review(&user, &card, ReviewRequest { quality })?;
            println!(
                "✓ {} reviewed: next in {} (EF {:.2}, streak {})",
                response.flashcard_id,
                format_interval(response.interval),
                response.easiness_factor,
                response.streak
            );
            if response.newly_mastered {
                println!("★ Card mastered!");
            }
        }
        Command::Preview { user, card } => {
            for (quality, days) in service.preview(&user, &card)? {
                println!("{} {:<10} {}", quality.value(), quality.name(), format_interval(days));
            }
        }
        Command::Due { user } => {
            let due = service.due_cards(&user)?;
            if due.is_empty() {
                println!("Nothing due.");
            }
            for record in due {
                println!(
                    "{:<24} due {}  ({} reviews, {:.0}% correct)",
                    record.flashcard_id,
                    record.next_review_date.format("%Y-%m-%d %H:%M"),
                    record.total_reviews,
                    record.accuracy() * 100.0
                );
            }
        }
        Command::Stats { user } => {
            let stats = service.stats(&user)?;
            println!("Cards:     {}", stats.total_cards);
            println!("New:       {}", stats.new_cards);
            println!("Due:       {}", stats.due_cards);
            println!("Learning:  {}", stats.learning_cards);
            println!("Mastered:  {}", stats.mastered_cards);
            println!("Accuracy:  {:.1}%", stats.accuracy() * 100.0);
            println!("Best run:  {}", stats.best_streak);
        }
        Command::Phoneme { user, phoneme, action } => {
            let response = match action.action() {
                Some(action) => {
                    let response = service.apply_phoneme_action(&user, &phoneme, action)?;
                    if !response.applied {
                        println!("(no change)");
                    }
                    response
                }
                None => service.phoneme_status(&user, &phoneme)?,
            };
            print_mastery(&response);
        }
        Command::Export { path } => {
            let now = SystemClock.now();
            let path = path.unwrap_or_else(|| default_backup_path(now));
            let count = service.store().export_backup(&path, now)?;
            println!("✓ Exported {} records to {}", count, path.display());
        }
        Command::Import { path } => {
            let summary = service.store().import_backup(&path)?;
            println!(
                "✓ Imported {} records ({} already present)",
                summary.imported, summary.skipped
            );
        }
    }
    Ok(())
}

fn print_mastery(response: &MasteryResponse) {
    println!("{}: {}", response.phoneme_id, response.stage.name());
    println!(
        "  discrimination {:.0}%  best production {:.0}%",
        response.discrimination_accuracy * 100.0,
        response.production_best_score * 100.0
    );
    if response.newly_mastered {
        println!("★ Mastered! level {}", response.mastery_level);
    } else if let Some(step) = response.stage.next_step() {
        println!("  next: {}", step);
    }
}
