use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use course_core::model::{CourseId, DayNumber, LearnerId, Roadmap, RoadmapDay};
use course_core::{DayState, DayView};
use services::sync::ProgressBackend;
use services::{
    Clock, CredentialSource, FailureKind, HttpProgressBackend, InMemoryBackend, ProgressSyncClient,
    ProgressionEngine, QuizAttemptManager, StaticCredentials, SyncConfig, SyncOutcome,
};
use storage::repository::Storage;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingDay { command: &'static str },
    MissingRoadmap,
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDay { raw: String },
    InvalidAnswer { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingDay { command } => write!(f, "{command} requires a day number"),
            ArgsError::MissingRoadmap => write!(f, "--roadmap <file.json> is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDay { raw } => write!(f, "invalid day number: {raw}"),
            ArgsError::InvalidAnswer { raw } => write!(f, "invalid answer list: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  learn-progress <command> --roadmap <file.json> [--course <id>] [--learner <id>] [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                 show every day and overall progress");
    eprintln!("  watch <day>            record that the day's video was watched");
    eprintln!("  complete <day>         mark a day complete");
    eprintln!("  undo <day>             mark a day and every later day incomplete");
    eprintln!("  quiz <day> <answers>   submit answers, e.g. 0,2,1,-  (- skips a question)");
    eprintln!("  history <day>          show quiz attempts for a day");
    eprintln!("  sync                   push current progress again");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://progress.sqlite3");
    eprintln!("  --course 1  --learner 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_DB_URL, LEARN_LEARNER_ID");
    eprintln!("  LEARN_API_BASE_URL, LEARN_API_TOKEN, LEARN_API_TIMEOUT_SECS");
    eprintln!("  RUST_LOG (default: info)");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Status,
    Watch(DayNumber),
    Complete(DayNumber),
    Undo(DayNumber),
    Quiz {
        day: DayNumber,
        answers: Vec<Option<usize>>,
    },
    History(DayNumber),
    Sync,
}

struct Args {
    command: Command,
    db_url: String,
    learner: LearnerId,
    course: CourseId,
    roadmap: PathBuf,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut db_url = std::env::var("LEARN_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://progress.sqlite3".into(), normalize_sqlite_url);
        let mut learner = std::env::var("LEARN_LEARNER_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| LearnerId::new(1), LearnerId::new);
        let mut course = CourseId::new(1);
        let mut roadmap = None;
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--learner" => learner = LearnerId::new(parse_id(args, "--learner")?),
                "--course" => course = CourseId::new(parse_id(args, "--course")?),
                "--roadmap" => roadmap = Some(PathBuf::from(require_value(args, "--roadmap")?)),
                "--help" | "-h" => return Ok(None),
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let command = match positional.next().as_deref() {
            None | Some("status") => Command::Status,
            Some("watch") => Command::Watch(parse_day(positional.next(), "watch")?),
            Some("complete") => Command::Complete(parse_day(positional.next(), "complete")?),
            Some("undo") => Command::Undo(parse_day(positional.next(), "undo")?),
            Some("history") => Command::History(parse_day(positional.next(), "history")?),
            Some("quiz") => {
                let day = parse_day(positional.next(), "quiz")?;
                let answers = parse_answers(&positional.next().unwrap_or_default())?;
                Command::Quiz { day, answers }
            }
            Some("sync") => Command::Sync,
            Some(other) => return Err(ArgsError::UnknownArg(other.to_string())),
        };
        if let Some(extra) = positional.next() {
            return Err(ArgsError::UnknownArg(extra));
        }

        Ok(Some(Self {
            command,
            db_url,
            learner,
            course,
            roadmap: roadmap.ok_or(ArgsError::MissingRoadmap)?,
        }))
    }
}

fn parse_id(args: &mut impl Iterator<Item = String>, flag: &'static str) -> Result<u64, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidId { flag, raw: value })
}

fn parse_day(raw: Option<String>, command: &'static str) -> Result<DayNumber, ArgsError> {
    let raw = raw.ok_or(ArgsError::MissingDay { command })?;
    raw.parse().map_err(|_| ArgsError::InvalidDay { raw })
}

/// `0,2,-,1` → `[Some(0), Some(2), None, Some(1)]`.
fn parse_answers(raw: &str) -> Result<Vec<Option<usize>>, ArgsError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|part| match part.trim() {
            "-" | "" => Ok(None),
            index => index.parse().map(Some).map_err(|_| ArgsError::InvalidAnswer {
                raw: raw.to_string(),
            }),
        })
        .collect()
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

fn load_roadmap(path: &Path, course: CourseId) -> Result<Roadmap, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let days: Vec<RoadmapDay> = serde_json::from_str(&raw)?;
    Ok(Roadmap::new(course, days)?)
}

/// HTTP sync when `LEARN_API_BASE_URL` is set; otherwise an offline backend
/// with no credential, so every sync call is skipped.
fn build_sync(clock: Clock) -> Result<ProgressSyncClient, Box<dyn std::error::Error>> {
    let (backend, credentials): (Arc<dyn ProgressBackend>, Arc<dyn CredentialSource>) =
        match SyncConfig::from_env() {
            Some(config) => {
                info!(base_url = %config.base_url, "progress sync enabled");
                (
                    Arc::new(HttpProgressBackend::new(config)?),
                    Arc::new(StaticCredentials::from_env()),
                )
            }
            None => {
                debug!("LEARN_API_BASE_URL not set, running offline");
                (
                    Arc::new(InMemoryBackend::new()),
                    Arc::new(StaticCredentials::anonymous()),
                )
            }
        };
    Ok(ProgressSyncClient::new(backend, credentials, clock))
}

fn describe(view: &DayView, topic: &str) -> String {
    let marker = match view.state {
        DayState::Completed => "[x]",
        DayState::Locked => "[#]",
        DayState::NotWatched => "[ ]",
        DayState::QuizPending => "[?]",
        DayState::Watched => "[~]",
    };
    let mut line = format!("{marker} day {:>2}  {topic}", view.day);
    if view.has_quiz {
        let best = view
            .best_score
            .map_or_else(|| "-".to_string(), |score| format!("{score}%"));
        line.push_str(&format!(
            "  quiz: {} used, {} left, best {best}{}",
            view.attempts_used,
            view.attempts_remaining,
            if view.passed { " (passed)" } else { "" }
        ));
    }
    line
}

fn report_push(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Pushed => println!("synced"),
        SyncOutcome::Superseded => debug!("push superseded by a newer one"),
        SyncOutcome::Skipped => println!("saved locally (not signed in)"),
        SyncOutcome::Failed(err) => {
            warn!(error = %err, "progress saved locally but not synced");
            println!("saved locally, sync failed: {err}");
        }
    }
}

fn failure_hint(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::InvalidTransition => "that step is not available yet",
        FailureKind::AttemptLimitExceeded => "no quiz attempts left for this day",
        FailureKind::SyncConflict => "the server rejected the submission",
        FailureKind::NetworkFailure => "could not reach the progress server",
        FailureKind::NotAuthenticated => "sign in to sync progress",
        FailureKind::Storage => "local progress could not be saved",
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let Some(args) = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?
    else {
        print_usage();
        return Ok(());
    };

    let roadmap = Arc::new(load_roadmap(&args.roadmap, args.course)?);
    prepare_sqlite_file(&args.db_url)?;
    let storage = Storage::sqlite(&args.db_url).await?;
    let clock = Clock::default();
    let sync = build_sync(clock)?;
    let quizzes = QuizAttemptManager::new(sync.clone(), clock);

    let (mut engine, report) = ProgressionEngine::load(
        args.learner,
        Arc::clone(&roadmap),
        storage.progress.clone(),
        sync,
        quizzes,
    )
    .await?;
    if let Some(err) = report.pull_error {
        println!("offline: using saved progress ({err})");
    }
    if let Some(err) = report.history_error {
        debug!(error = %err, "quiz history not refreshed on open");
    }

    match args.command {
        Command::Status => {
            let progress = engine.progress();
            println!(
                "course {}: {}% ({})",
                engine.course_id(),
                progress.progress_percent,
                progress.status.as_str()
            );
            for day in roadmap.days() {
                if engine.state().watched().contains(&day.day_number) {
                    // failures are logged; status falls back to local attempts
                    let _ = engine.ensure_quiz_history(day.day_number).await;
                }
                let view = engine.day_view(day.day_number)?;
                println!("{}", describe(&view, &day.topic));
            }
            println!("resume at day {}", engine.state().resume_day());
        }
        Command::Watch(day) => {
            let watched = engine.record_video_watched(day).await?;
            engine.select_day(day, false).await?;
            match watched.completed {
                Some(transition) => {
                    println!("day {day} complete ({}%)", transition.progress.progress_percent);
                    report_push(transition.push.outcome().await);
                }
                None if engine.is_day_locked(day) => {
                    println!("day {day} watched; complete day {} first", day.saturating_sub(1));
                }
                None if engine.is_quiz_unlocked(day) => {
                    println!("day {day} watched; quiz unlocked");
                }
                None => println!("day {day} watched"),
            }
        }
        Command::Complete(day) => {
            let transition = engine.mark_day_complete(day).await?;
            println!("day {day} complete ({}%)", transition.progress.progress_percent);
            report_push(transition.push.outcome().await);
        }
        Command::Undo(day) => {
            let transition = engine.mark_day_incomplete(day).await?;
            println!(
                "days {day}+ marked incomplete ({}%)",
                transition.progress.progress_percent
            );
            report_push(transition.push.outcome().await);
        }
        Command::Quiz { day, answers } => {
            let selection = engine.select_day(day, true).await?;
            if let Some(err) = selection.history_error {
                println!("could not refresh quiz history: {err}");
            }
            match engine.submit_quiz(day, &answers).await {
                Ok(attempt) => {
                    println!(
                        "attempt {}: {}%{}",
                        attempt.attempt_number(),
                        attempt.score(),
                        if attempt.passed() { " (passed)" } else { "" }
                    );
                    if engine.check_day_completion(day) {
                        println!("run `complete {day}` to finish the day");
                    }
                }
                Err(err) => {
                    println!("{}", failure_hint(err.kind()));
                    return Err(err.into());
                }
            }
        }
        Command::History(day) => {
            let selection = engine.select_day(day, true).await?;
            if let Some(err) = selection.history_error {
                println!("showing local attempts only: {err}");
            }
            let history = engine.quiz_history(day);
            if history.is_empty() {
                println!("no attempts for day {day}");
            }
            for attempt in history {
                println!(
                    "attempt {}  {:>3}%  of {} questions  {}",
                    attempt.attempt_number(),
                    attempt.score(),
                    attempt.total_questions(),
                    attempt.submitted_at().format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Sync => {
            report_push(engine.resync().await.outcome().await);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
